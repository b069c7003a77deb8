//! Ingress resources for custom routes.

use std::collections::BTreeMap;

use log::debug;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::build_values::{BuildContext, BuildType, EnvironmentType};
use crate::naming::{shorten_with_hash, AUTOGENERATED_NAME_MAX_LENGTH, DOMAIN_MAX_LENGTH};
use crate::route::{Fastly, InsecurePolicy, Route};

pub const API_VERSION: &str = "networking.k8s.io/v1";
pub const KIND: &str = "Ingress";

const CHART_NAME: &str = "custom-ingress";
const CHART_VERSION: &str = "0.1.0";
const DEFAULT_SERVICE_PORT_NAME: &str = "http";
const MONITORING_INTERVAL: &str = "60";
const UNCONFIGURED_ALERT_CONTACT: &str = "unconfigured";
const NO_ROBOTS_SNIPPET: &str = "add_header X-Robots-Tag \"noindex, nofollow\";\n";

pub mod labels {
    //! Label keys set on every custom ingress.

    pub const AUTOGENERATED: &str = "lagoon.sh/autogenerated";
    pub const HELM_CHART: &str = "helm.sh/chart";
    pub const APP_NAME: &str = "app.kubernetes.io/name";
    pub const APP_INSTANCE: &str = "app.kubernetes.io/instance";
    pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
    pub const SERVICE: &str = "lagoon.sh/service";
    pub const SERVICE_TYPE: &str = "lagoon.sh/service-type";
    pub const PROJECT: &str = "lagoon.sh/project";
    pub const ENVIRONMENT: &str = "lagoon.sh/environment";
    pub const ENVIRONMENT_TYPE: &str = "lagoon.sh/environmentType";
    pub const BUILD_TYPE: &str = "lagoon.sh/buildType";

    /// Tells the migration controller whether to move this ingress between environments.
    pub const MIGRATE: &str = "dioscuri.amazee.io/migrate";
}

pub mod annotations {
    //! Annotation keys understood by the ingress controllers, certificate
    //! manager, uptime monitor and CDN integration.

    pub const TLS_ACME: &str = "kubernetes.io/tls-acme";
    pub const FASTLY_WATCH: &str = "fastly.amazee.io/watch";
    pub const FASTLY_SERVICE_ID: &str = "fastly.amazee.io/service-id";
    pub const FASTLY_API_SECRET_NAME: &str = "fastly.amazee.io/api-secret-name";
    pub const LAGOON_VERSION: &str = "lagoon.sh/version";

    pub const MONITOR_ENABLED: &str = "monitor.stakater.com/enabled";
    pub const MONITOR_OVERRIDE_PATH: &str = "monitor.stakater.com/overridePath";
    pub const MONITOR_ALERT_CONTACTS: &str = "uptimerobot.monitor.stakater.com/alert-contacts";
    pub const MONITOR_STATUS_PAGES: &str = "uptimerobot.monitor.stakater.com/status-pages";
    pub const MONITOR_INTERVAL: &str = "uptimerobot.monitor.stakater.com/interval";

    pub const BRANCH: &str = "lagoon.sh/branch";
    pub const PR_NUMBER: &str = "lagoon.sh/prNumber";
    pub const PR_HEAD_BRANCH: &str = "lagoon.sh/prHeadBranch";
    pub const PR_BASE_BRANCH: &str = "lagoon.sh/prBaseBranch";

    pub const NGINX_SSL_REDIRECT: &str = "nginx.ingress.kubernetes.io/ssl-redirect";
    pub const SSL_REDIRECT: &str = "ingress.kubernetes.io/ssl-redirect";
    pub const NGINX_SERVER_SNIPPET: &str = "nginx.ingress.kubernetes.io/server-snippet";
}

/// Uptime monitoring settings for the environment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitoringConfig {
    pub enabled: bool,
    /// Alert contact. Empty keeps the "unconfigured" placeholder.
    pub contact: String,
    pub status_page_id: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ingress {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: IngressSpec,
}

#[derive(Serialize, Debug, Clone, PartialEq, Default)]
pub struct ObjectMeta {
    pub annotations: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub name: String,
}

#[derive(Serialize, Debug, Clone, PartialEq, Default)]
pub struct IngressSpec {
    pub rules: Vec<IngressRule>,
    pub tls: Vec<IngressTls>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressTls {
    pub hosts: Vec<String>,
    pub secret_name: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct IngressRule {
    pub host: String,
    pub http: HttpIngressRuleValue,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct HttpIngressRuleValue {
    pub paths: Vec<HttpIngressPath>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpIngressPath {
    pub backend: IngressBackend,
    pub path: String,
    pub path_type: PathType,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathType {
    #[default]
    Prefix,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct IngressBackend {
    pub service: IngressServiceBackend,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct IngressServiceBackend {
    pub name: String,
    pub port: ServicePort,
}

/// A backend port, referenced either by name or by number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServicePort {
    Name(String),
    Number(i32),
}

impl ServicePort {
    /// Port precedence: `servicePortName` over `servicePortNumber` over the
    /// default `http` port name.
    pub fn resolve(route: &Route) -> Self {
        match (&route.service_port_name, route.service_port_number) {
            (Some(name), _) => ServicePort::Name(name.clone()),
            (None, Some(number)) => ServicePort::Number(number),
            (None, None) => ServicePort::Name(DEFAULT_SERVICE_PORT_NAME.to_string()),
        }
    }
}

impl Serialize for ServicePort {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            ServicePort::Name(name) => map.serialize_entry("name", name)?,
            ServicePort::Number(number) => map.serialize_entry("number", number)?,
        }
        map.end()
    }
}

type StringMap = BTreeMap<String, String>;

fn string_map<const N: usize>(entries: [(&str, &str); N]) -> StringMap {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Merge `layers` into one map, in order. Later layers overwrite earlier
/// ones on key collision.
pub fn layered<I: IntoIterator<Item = StringMap>>(layers: I) -> StringMap {
    layers.into_iter().fold(StringMap::new(), |mut acc, layer| {
        acc.extend(layer);
        acc
    })
}

/// The ingress name: a non-empty `ingressName` if given, otherwise the
/// domain, shortened with a hash once it reaches the name length limit.
pub fn ingress_name(route: &Route) -> String {
    match &route.ingress_name {
        Some(name) if !name.is_empty() => name.clone(),
        _ => shorten_with_hash(&route.domain, AUTOGENERATED_NAME_MAX_LENGTH),
    }
}

pub fn identity_labels(route: &Route, build: &BuildContext) -> StringMap {
    string_map([
        (labels::AUTOGENERATED, "false"),
        (labels::HELM_CHART, format!("{CHART_NAME}-{CHART_VERSION}").as_str()),
        (labels::APP_NAME, CHART_NAME),
        (labels::APP_INSTANCE, route.domain.as_str()),
        (labels::MANAGED_BY, "Helm"),
        (labels::SERVICE, route.domain.as_str()),
        (labels::SERVICE_TYPE, CHART_NAME),
        (labels::PROJECT, build.project.as_str()),
        (labels::ENVIRONMENT, build.environment.as_str()),
        (labels::ENVIRONMENT_TYPE, build.environment_type.as_str()),
        (labels::BUILD_TYPE, build.build_type.as_str()),
    ])
}

pub fn migrate_label(route: &Route) -> StringMap {
    let migrate = route.migrate.unwrap_or(false);
    string_map([(labels::MIGRATE, migrate.to_string().as_str())])
}

/// Rank 1.
pub fn base_annotations(route: &Route, build: &BuildContext) -> StringMap {
    string_map([
        (annotations::TLS_ACME, route.tls_acme.to_string().as_str()),
        (annotations::FASTLY_WATCH, route.fastly.watch.to_string().as_str()),
        (annotations::LAGOON_VERSION, build.lagoon_version.as_str()),
    ])
}

/// Rank 2.
pub fn monitoring_annotations(monitoring: &MonitoringConfig) -> StringMap {
    if !monitoring.enabled {
        return string_map([(annotations::MONITOR_ENABLED, "false")]);
    }
    let contact = if monitoring.contact.is_empty() {
        UNCONFIGURED_ALERT_CONTACT
    } else {
        monitoring.contact.as_str()
    };
    let mut map = string_map([
        (annotations::MONITOR_ENABLED, "true"),
        (annotations::MONITOR_ALERT_CONTACTS, contact),
        (annotations::MONITOR_INTERVAL, MONITORING_INTERVAL),
    ]);
    if !monitoring.status_page_id.is_empty() {
        map.insert(
            annotations::MONITOR_STATUS_PAGES.to_string(),
            monitoring.status_page_id.clone(),
        );
    }
    map
}

/// Rank 3.
pub fn monitoring_path_annotation(route: &Route) -> StringMap {
    match route.monitoring_path.as_deref() {
        Some(path) if !path.is_empty() => string_map([(annotations::MONITOR_OVERRIDE_PATH, path)]),
        _ => StringMap::new(),
    }
}

/// Rank 4.
pub fn fastly_annotations(fastly: &Fastly) -> StringMap {
    let mut map = StringMap::new();
    if let Some(id) = fastly.service_id.as_deref().filter(|s| !s.is_empty()) {
        map.insert(annotations::FASTLY_SERVICE_ID.to_string(), id.to_string());
    }
    if let Some(secret) = fastly.api_secret_name.as_deref().filter(|s| !s.is_empty()) {
        map.insert(annotations::FASTLY_API_SECRET_NAME.to_string(), secret.to_string());
    }
    map
}

/// Rank 5.
pub fn build_type_annotations(build: &BuildContext) -> StringMap {
    match build.build_type {
        BuildType::Branch => string_map([(annotations::BRANCH, build.branch.as_str())]),
        BuildType::PullRequest => string_map([
            (annotations::PR_NUMBER, build.pr_number.as_str()),
            (annotations::PR_HEAD_BRANCH, build.pr_head_branch.as_str()),
            (annotations::PR_BASE_BRANCH, build.pr_base_branch.as_str()),
        ]),
        BuildType::Promote => StringMap::new(),
    }
}

/// Rank 6. Both keys are written so either ingress controller flavour picks it up.
/// `None` redirects just like `Redirect`.
pub fn insecure_annotations(insecure: &InsecurePolicy) -> StringMap {
    let redirect = match insecure {
        InsecurePolicy::Allow => "false",
        InsecurePolicy::Redirect | InsecurePolicy::None => "true",
        InsecurePolicy::Unknown => return StringMap::new(),
    };
    string_map([
        (annotations::NGINX_SSL_REDIRECT, redirect),
        (annotations::SSL_REDIRECT, redirect),
    ])
}

/// Rank 7. Keeps crawlers off development environments.
pub fn environment_type_annotations(build: &BuildContext) -> StringMap {
    match build.environment_type {
        EnvironmentType::Development => {
            string_map([(annotations::NGINX_SERVER_SNIPPET, NO_ROBOTS_SNIPPET)])
        }
        EnvironmentType::Production => StringMap::new(),
    }
}

fn rule(host: &str, service: &str, port: &ServicePort) -> IngressRule {
    IngressRule {
        host: host.to_string(),
        http: HttpIngressRuleValue {
            paths: vec![HttpIngressPath {
                backend: IngressBackend {
                    service: IngressServiceBackend {
                        name: service.to_string(),
                        port: port.clone(),
                    },
                },
                path: "/".to_string(),
                path_type: PathType::Prefix,
            }],
        },
    }
}

/// Build the ingress for a single route.
///
/// Pure: the same inputs always produce the same resource.
pub fn generate_ingress(route: &Route, build: &BuildContext, monitoring: &MonitoringConfig) -> Ingress {
    let name = ingress_name(route);
    debug!("Generating ingress {name} for {}", route.domain);

    let labels = layered([
        identity_labels(route, build),
        migrate_label(route),
        route.labels.clone(),
    ]);
    let annotations = layered([
        base_annotations(route, build),
        monitoring_annotations(monitoring),
        monitoring_path_annotation(route),
        fastly_annotations(&route.fastly),
        build_type_annotations(build),
        insecure_annotations(&route.insecure),
        environment_type_annotations(build),
        route.annotations.clone(),
    ]);

    // Certificate challenges fail for common names over 63 characters, so the
    // short domain goes first and becomes the common name.
    let mut hosts = Vec::with_capacity(route.alternative_names.len() + 2);
    if let Some(short) = build
        .short_autogenerated_route_domain
        .as_deref()
        .filter(|s| !s.is_empty())
    {
        if route.domain.len() > DOMAIN_MAX_LENGTH {
            hosts.push(short.to_string());
        }
    }
    hosts.push(route.domain.clone());

    let port = ServicePort::resolve(route);
    let mut rules = vec![rule(&route.domain, &route.service, &port)];
    for alternative in &route.alternative_names {
        hosts.push(alternative.clone());
        rules.push(rule(alternative, &route.service, &port));
    }

    Ingress {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        metadata: ObjectMeta {
            annotations,
            labels,
            name: name.clone(),
        },
        spec: IngressSpec {
            rules,
            tls: vec![IngressTls {
                hosts,
                secret_name: format!("{name}-tls"),
            }],
        },
    }
}
