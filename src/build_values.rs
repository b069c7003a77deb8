/// What triggered the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum BuildType {
    #[default]
    Branch,
    #[value(name = "pullrequest")]
    PullRequest,
    Promote,
}

impl BuildType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildType::Branch => "branch",
            BuildType::PullRequest => "pullrequest",
            BuildType::Promote => "promote",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum EnvironmentType {
    Production,
    #[default]
    Development,
}

impl EnvironmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentType::Production => "production",
            EnvironmentType::Development => "development",
        }
    }
}

/// Values describing the current build, shared by every route templated in it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildContext {
    pub project: String,
    pub environment: String,
    pub environment_type: EnvironmentType,
    pub build_type: BuildType,
    pub branch: String,
    pub pr_number: String,
    pub pr_head_branch: String,
    pub pr_base_branch: String,
    pub lagoon_version: String,
    /// Shorter stand-in for autogenerated domains too long to be a certificate common name.
    pub short_autogenerated_route_domain: Option<String>,
}
