use crate::server::cors::DEFAULT_ALLOWED_ORIGINS;
use anyhow::bail;
use clap::Parser;
use core::fmt;
use core::time::Duration;
use remcard_partners::{GitHubTarget, RetryPolicy};

/// Runtime configuration for the `remcard-partners-server` binary.
///
/// Every setting can come from a CLI flag or an environment variable; a `.env`
/// file in the working directory is loaded first. Defaults match the public
/// RemCard deployment.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "remcard-partners-server",
    version,
    about = "Accepts partner submissions and appends them to the RemCard catalog"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:3000"))]
    pub server_addr: String,

    /// Token used to read and commit the catalog file.
    ///
    /// `GITHUB_TOKEN` and then `GH_TOKEN` are consulted when this is unset or
    /// blank. Without any token the endpoint still answers, but every
    /// submission is rejected as "not configured".
    ///
    /// Environment variable: `REMCARD_GITHUB_TOKEN`
    #[arg(long, env = "REMCARD_GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    #[arg(long, env = "GITHUB_TOKEN", hide = true, hide_env_values = true)]
    pub fallback_github_token: Option<String>,

    #[arg(long, env = "GH_TOKEN", hide = true, hide_env_values = true)]
    pub fallback_gh_token: Option<String>,

    /// Repository holding the catalog, as `owner/name`.
    ///
    /// Environment variable: `GITHUB_REPO`
    #[arg(long, env = "GITHUB_REPO", default_value_t = String::from("karenavedikyan/rem"))]
    pub github_repo: String,

    /// Path of the catalog file inside the repository.
    ///
    /// Environment variable: `PARTNERS_FILE`
    #[arg(long, env = "PARTNERS_FILE", default_value_t = String::from("partnersData.js"))]
    pub partners_file: String,

    /// Branch to read and commit to. The repository's default branch when
    /// unset.
    ///
    /// Environment variable: `GITHUB_BRANCH`
    #[arg(long, env = "GITHUB_BRANCH")]
    pub github_branch: Option<String>,

    /// Base URL of the GitHub REST API.
    ///
    /// Environment variable: `GITHUB_API_URL`
    #[arg(long, env = "GITHUB_API_URL", default_value_t = String::from("https://api.github.com"))]
    pub github_api_url: String,

    /// Origins allowed to call the endpoint from a browser, comma separated.
    /// The first entry is returned to callers whose origin is not listed.
    ///
    /// Environment variable: `ALLOWED_ORIGINS`
    #[arg(
        long,
        env = "ALLOWED_ORIGINS",
        value_delimiter = ',',
        default_values_t = DEFAULT_ALLOWED_ORIGINS.map(String::from)
    )]
    pub allowed_origins: Vec<String>,

    /// Attempts per submission when another writer changes the catalog
    /// concurrently. Must be at least 1.
    ///
    /// Environment variable: `APPEND_MAX_ATTEMPTS`
    #[arg(long, env = "APPEND_MAX_ATTEMPTS", default_value_t = 3)]
    pub append_max_attempts: usize,

    /// Base delay between attempts, in milliseconds.
    ///
    /// Environment variable: `APPEND_BACKOFF_MS`
    #[arg(long, env = "APPEND_BACKOFF_MS", default_value_t = 150)]
    pub append_backoff_ms: u64,

    /// Timeout for each request to the GitHub API, in seconds.
    ///
    /// Environment variable: `UPSTREAM_TIMEOUT_SECS`
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value_t = 15)]
    pub upstream_timeout_secs: u64,

    /// Deployment label reported by the readiness probe.
    ///
    /// Environment variable: `DEPLOY_ENV`
    #[arg(long, env = "DEPLOY_ENV", default_value_t = String::from("unknown"))]
    pub deploy_env: String,

    /// Serve from an in-process catalog that starts empty and is lost on
    /// exit. Useful for local frontend work.
    #[arg(long, default_value_t = false)]
    pub in_memory: bool,
}

/// Secret API token.
///
/// Neither `Debug` nor `Display` reveal the value; only
/// [`Credential::expose`] does.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Returns the first candidate that is not blank.
    pub fn first_present<I, S>(candidates: I) -> Option<Self>
    where
        I: IntoIterator<Item = Option<S>>,
        S: AsRef<str>,
    {
        candidates
            .into_iter()
            .flatten()
            .map(|s| s.as_ref().trim().to_string())
            .find(|s| !s.is_empty())
            .map(Self)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub credential: Option<Credential>,
    pub target: GitHubTarget,
    pub allowed_origins: Vec<String>,
    pub retry: RetryPolicy,
    pub upstream_timeout: Duration,
    pub deploy_env: String,
    pub in_memory: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_addr: "0.0.0.0:3000".to_string(),
            credential: None,
            target: GitHubTarget {
                api_url: "https://api.github.com".to_string(),
                repo: "karenavedikyan/rem".to_string(),
                path: "partnersData.js".to_string(),
                branch: None,
            },
            allowed_origins: DEFAULT_ALLOWED_ORIGINS.map(String::from).to_vec(),
            retry: RetryPolicy::default(),
            upstream_timeout: Duration::from_secs(15),
            deploy_env: "unknown".to_string(),
            in_memory: false,
        }
    }
}

impl ServerConfig {
    /// Whether submissions can be accepted at all.
    pub const fn is_configured(&self) -> bool {
        self.credential.is_some() || self.in_memory
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.append_max_attempts == 0 {
            bail!("APPEND_MAX_ATTEMPTS must be greater than 0");
        }

        if args.upstream_timeout_secs == 0 {
            bail!("UPSTREAM_TIMEOUT_SECS must be greater than 0");
        }

        let allowed_origins: Vec<String> = args
            .allowed_origins
            .iter()
            .map(|origin| origin.trim().trim_end_matches('/').to_string())
            .filter(|origin| !origin.is_empty())
            .collect();
        if allowed_origins.is_empty() {
            bail!("ALLOWED_ORIGINS must name at least one origin");
        }

        let repo = args.github_repo.trim();
        if repo.split('/').filter(|s| !s.is_empty()).count() != 2 {
            bail!("GITHUB_REPO ({repo}) must be in `owner/name` form");
        }

        let path = args.partners_file.trim().trim_start_matches('/');
        if path.is_empty() {
            bail!("PARTNERS_FILE must not be empty");
        }

        let credential = Credential::first_present([
            args.github_token,
            args.fallback_github_token,
            args.fallback_gh_token,
        ]);

        Ok(Self {
            server_addr: args.server_addr,
            credential,
            target: GitHubTarget {
                api_url: args.github_api_url.trim().to_string(),
                repo: repo.to_string(),
                path: path.to_string(),
                branch: args
                    .github_branch
                    .map(|b| b.trim().to_string())
                    .filter(|b| !b.is_empty()),
            },
            allowed_origins,
            retry: RetryPolicy {
                max_attempts: args.append_max_attempts,
                base_backoff_ms: args.append_backoff_ms,
            },
            upstream_timeout: Duration::from_secs(args.upstream_timeout_secs),
            deploy_env: args.deploy_env,
            in_memory: args.in_memory,
        })
    }
}
