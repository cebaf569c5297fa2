use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct ArgoArgs {
    /// Base URL of the GitOps controller API server
    #[arg(long, env = "ARGOCD_URL", required = true)]
    pub argocd_url: String,

    /// Skip TLS verification when talking to the GitOps controller
    #[arg(long, env = "ARGOCD_INSECURE", default_value_t = false)]
    pub argocd_insecure: bool,

    /// Credential-store service name holding the session token
    #[arg(long, env = "ARGOCD_SERVICE", default_value = "argocd")]
    pub argocd_service: String,
}

#[derive(Parser, Debug, Clone)]
pub struct SourceHostArgs {
    /// Base URL of the source-control host
    #[arg(long, env = "GITLAB_URL", default_value = "https://gitlab.com")]
    pub gitlab_url: String,

    /// Credential-store service name holding the API token
    #[arg(long, env = "GITLAB_SERVICE", default_value = "gitlab")]
    pub gitlab_service: String,
}

#[derive(Parser, Debug, Clone)]
pub struct HelmArgs {
    /// Chart renderer binary invoked for merge-request impact analysis
    #[arg(long, env = "HELM_BIN", default_value = "helm")]
    pub helm_bin: String,

    /// Seconds before a render subprocess is killed
    #[arg(long, env = "HELM_TIMEOUT_SECS", default_value_t = 30)]
    pub helm_timeout_secs: u64,
}

#[derive(Parser, Debug, Clone)]
pub struct LimitArgs {
    /// Maximum characters in an assembled context document
    #[arg(long, env = "MAX_CONTEXT_SIZE", default_value_t = 100_000)]
    pub max_context_size: usize,

    /// Combined system + user prompt budget for completion calls
    #[arg(long, env = "MAX_PROMPT_SIZE", default_value_t = 100_000)]
    pub max_prompt_size: usize,
}
