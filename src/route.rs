use std::collections::BTreeMap;

use serde::Deserialize;

/// How plain HTTP traffic to a route is treated.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub enum InsecurePolicy {
    Allow,
    #[default]
    Redirect,
    None,
    /// Anything else. No redirect behaviour is configured for it.
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct Fastly {
    pub service_id: Option<String>,
    pub api_secret_name: Option<String>,
    pub watch: bool,
}

/// A route as declared for one service in `.lagoon.yml`.
///
/// `domain` and `service` come from the surrounding structure of the file,
/// everything else from the route's own options.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Route {
    #[serde(skip)]
    pub domain: String,
    #[serde(skip)]
    pub service: String,

    #[serde(rename = "ingressName")]
    pub ingress_name: Option<String>,
    #[serde(rename = "servicePortNumber")]
    pub service_port_number: Option<i32>,
    #[serde(rename = "servicePortName")]
    pub service_port_name: Option<String>,

    pub insecure: InsecurePolicy,
    #[serde(rename = "tls-acme")]
    pub tls_acme: bool,
    #[serde(rename = "alternativenames")]
    pub alternative_names: Vec<String>,
    #[serde(rename = "monitoring-path")]
    pub monitoring_path: Option<String>,
    pub migrate: Option<bool>,
    pub fastly: Fastly,
    pub annotations: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

impl Default for Route {
    fn default() -> Self {
        Self {
            domain: String::new(),
            service: "nginx".to_string(),
            ingress_name: None,
            service_port_number: None,
            service_port_name: None,
            insecure: InsecurePolicy::Redirect,
            tls_acme: true,
            alternative_names: Vec::new(),
            monitoring_path: None,
            migrate: None,
            fastly: Fastly::default(),
            annotations: BTreeMap::new(),
            labels: BTreeMap::new(),
        }
    }
}

impl Route {
    pub fn new(domain: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_options_are_omitted() {
        let route: Route = serde_yaml::from_str("{}").unwrap();
        assert!(route.tls_acme);
        assert_eq!(route.insecure, InsecurePolicy::Redirect);
        assert_eq!(route.migrate, None);
        assert!(!route.fastly.watch);
    }

    #[test]
    fn parses_route_options() {
        let route: Route = serde_yaml::from_str(
            r#"
tls-acme: false
insecure: Allow
monitoring-path: /bypass-cache
migrate: true
ingressName: my-ingress
servicePortNumber: 8080
alternativenames:
  - www.example.com
fastly:
  service-id: abc123
  api-secret-name: fastly-secret
  watch: true
annotations:
  nginx.ingress.kubernetes.io/proxy-body-size: 20m
labels:
  team: web
"#,
        )
        .unwrap();
        assert!(!route.tls_acme);
        assert_eq!(route.insecure, InsecurePolicy::Allow);
        assert_eq!(route.monitoring_path.as_deref(), Some("/bypass-cache"));
        assert_eq!(route.migrate, Some(true));
        assert_eq!(route.ingress_name.as_deref(), Some("my-ingress"));
        assert_eq!(route.service_port_number, Some(8080));
        assert_eq!(route.alternative_names, vec!["www.example.com"]);
        assert_eq!(route.fastly.service_id.as_deref(), Some("abc123"));
        assert_eq!(route.fastly.api_secret_name.as_deref(), Some("fastly-secret"));
        assert!(route.fastly.watch);
        assert_eq!(route.labels["team"], "web");
    }

    #[test]
    fn unknown_insecure_policy() {
        let route: Route = serde_yaml::from_str("insecure: Sometimes").unwrap();
        assert_eq!(route.insecure, InsecurePolicy::Unknown);
    }
}
