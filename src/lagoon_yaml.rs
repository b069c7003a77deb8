use std::path::{Path, PathBuf};

use log::debug;
use thiserror::Error;
use Error::*;

use crate::route::Route;
use crate::tasks::{Phase, Task};

#[derive(Error, Debug)]
pub enum Error {
    #[error("no .lagoon.yml found in {0}")]
    LagoonYamlNotFound(String),

    #[error("read {path}: {err}")]
    ReadFile { err: std::io::Error, path: String },

    #[error("deserialize: {0}")]
    Deserialize(#[from] serde_yaml::Error),
}

/// Returns the path of the build specification in `filesystem_path`.
pub fn detect_lagoon_yaml(filesystem_path: &Path) -> Result<PathBuf, Error> {
    const CANDIDATES: [&str; 2] = [".lagoon.yml", ".lagoon.yaml"];

    CANDIDATES
        .iter()
        .map(|name| filesystem_path.join(name))
        .inspect(|path| debug!("Looking for build specification at {}", path.display()))
        .find(|path| path.is_file())
        .ok_or_else(|| LagoonYamlNotFound(filesystem_path.display().to_string()))
}

/// The parts of `.lagoon.yml` this tool acts on.
#[derive(Debug, Default)]
pub struct LagoonYaml {
    pub pre_rollout: Vec<Task>,
    pub post_rollout: Vec<Task>,
    environments: std::collections::BTreeMap<String, Vec<Route>>,
}

impl LagoonYaml {
    pub fn parse(yaml_string: &str) -> Result<Self, Error> {
        let parsed = serde_yaml::from_str::<yaml::LagoonYaml>(yaml_string)?;
        let unwrap_runs =
            |runs: Vec<yaml::TaskRun>| runs.into_iter().map(|r| r.run).collect::<Vec<Task>>();

        let environments = parsed
            .environments
            .into_iter()
            .map(|(name, environment)| (name, yaml::flatten_routes(environment.routes)))
            .collect();

        Ok(Self {
            pre_rollout: unwrap_runs(parsed.tasks.pre_rollout),
            post_rollout: unwrap_runs(parsed.tasks.post_rollout),
            environments,
        })
    }

    pub fn parse_file(path: &Path) -> Result<Self, Error> {
        Self::parse(&std::fs::read_to_string(path).map_err(|err| ReadFile {
            err,
            path: path.display().to_string(),
        })?)
    }

    pub fn tasks(&self, phase: Phase) -> &[Task] {
        match phase {
            Phase::PreRollout => &self.pre_rollout,
            Phase::PostRollout => &self.post_rollout,
        }
    }

    /// Routes declared for `environment`, in declaration order.
    pub fn routes(&self, environment: &str) -> &[Route] {
        self.environments
            .get(environment)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

mod yaml {
    use std::collections::BTreeMap;

    use serde::Deserialize;

    use crate::route::Route;
    use crate::tasks::Task;

    #[derive(Deserialize, Default)]
    pub struct LagoonYaml {
        #[serde(default)]
        pub tasks: Tasks,
        #[serde(default)]
        pub environments: BTreeMap<String, Environment>,
    }

    #[derive(Deserialize, Default)]
    #[serde(default, rename_all = "kebab-case")]
    pub struct Tasks {
        pub pre_rollout: Vec<TaskRun>,
        pub post_rollout: Vec<TaskRun>,
    }

    #[derive(Deserialize)]
    pub struct TaskRun {
        pub run: Task,
    }

    #[derive(Deserialize, Default)]
    #[serde(default)]
    pub struct Environment {
        /// One single-key map per service: `- nginx: [routes...]`.
        pub routes: Vec<BTreeMap<String, Vec<RouteEntry>>>,
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    pub enum RouteEntry {
        Domain(String),
        WithOptions(BTreeMap<String, Route>),
    }

    pub fn flatten_routes(services: Vec<BTreeMap<String, Vec<RouteEntry>>>) -> Vec<Route> {
        let mut routes = Vec::new();
        for (service, entries) in services.into_iter().flatten() {
            for entry in entries {
                match entry {
                    RouteEntry::Domain(domain) => routes.push(Route::new(domain, service.clone())),
                    RouteEntry::WithOptions(options) => {
                        for (domain, mut route) in options {
                            route.domain = domain;
                            route.service = service.clone();
                            routes.push(route);
                        }
                    }
                }
            }
        }
        routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::InsecurePolicy;

    const LAGOON_YAML: &str = r#"
docker-compose-yaml: docker-compose.yml

tasks:
  pre-rollout:
    - run:
        name: drush sql-dump
        command: drush sql-dump > /tmp/backup.sql
        service: cli
  post-rollout:
    - run:
        name: drush cim
        command: drush -y cim
        service: cli
        when: LAGOON_ENVIRONMENT_TYPE == 'production'
    - run:
        command: drush cr

environments:
  main:
    routes:
      - nginx:
          - example.com
          - "www.example.com":
              tls-acme: false
              insecure: Allow
              alternativenames:
                - en.example.com
      - varnish:
          - cache.example.com
  develop:
    routes: []
"#;

    #[test]
    fn parse_tasks() {
        let parsed = LagoonYaml::parse(LAGOON_YAML).unwrap();
        let pre = parsed.tasks(Phase::PreRollout);
        assert_eq!(pre.len(), 1);
        assert_eq!(pre[0].display_name(), "drush sql-dump");
        assert_eq!(pre[0].when, "");

        let post = parsed.tasks(Phase::PostRollout);
        assert_eq!(post.len(), 2);
        assert_eq!(post[0].when, "LAGOON_ENVIRONMENT_TYPE == 'production'");
        assert_eq!(post[1].display_name(), "drush cr");
        assert_eq!(post[1].service, "cli");
        assert_eq!(post[1].shell, "sh");
    }

    #[test]
    fn parse_routes() {
        let parsed = LagoonYaml::parse(LAGOON_YAML).unwrap();
        let routes = parsed.routes("main");
        let domains: Vec<_> = routes.iter().map(|r| (r.service.as_str(), r.domain.as_str())).collect();
        assert_eq!(
            domains,
            vec![
                ("nginx", "example.com"),
                ("nginx", "www.example.com"),
                ("varnish", "cache.example.com"),
            ]
        );
        assert!(routes[0].tls_acme);
        assert!(!routes[1].tls_acme);
        assert_eq!(routes[1].insecure, InsecurePolicy::Allow);
        assert_eq!(routes[1].alternative_names, vec!["en.example.com"]);

        assert!(parsed.routes("develop").is_empty());
        assert!(parsed.routes("missing").is_empty());
    }

    #[test]
    fn empty_file() {
        let parsed = LagoonYaml::parse("docker-compose-yaml: docker-compose.yml").unwrap();
        assert!(parsed.tasks(Phase::PreRollout).is_empty());
        assert!(parsed.routes("main").is_empty());
    }

    #[test]
    fn detect() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(detect_lagoon_yaml(dir.path()), Err(LagoonYamlNotFound(_))));

        let path = dir.path().join(".lagoon.yml");
        std::fs::write(&path, LAGOON_YAML).unwrap();
        assert_eq!(detect_lagoon_yaml(dir.path()).unwrap(), path);
        assert_eq!(LagoonYaml::parse_file(&path).unwrap().routes("main").len(), 3);
    }
}
