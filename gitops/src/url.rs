use crate::models::Application;

/// Extract the `namespace/project` path from a repository URL. Accepts
/// `https://host/ns/proj(.git)`, `http://…`, and `git@host:ns/proj(.git)`.
/// Returns an empty string on unparseable input.
pub fn extract_project_path(url: &str) -> String {
    let url = url.trim();
    if let Some(rest) = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
    {
        let path = match rest.split_once('/') {
            Some((_host, path)) => path,
            None => return String::new(),
        };
        return trim_git(path).trim_matches('/').to_string();
    }
    if let Some(rest) = url.strip_prefix("git@")
        && let Some((_host, path)) = rest.split_once(':')
    {
        return trim_git(path).trim_matches('/').to_string();
    }
    String::new()
}

fn trim_git(path: &str) -> &str {
    path.strip_suffix(".git").unwrap_or(path)
}

const ENV_TOKENS: [&str; 3] = ["prod", "staging", "dev"];

/// Infer the deployment environment an application targets: explicit
/// labels first, then well-known tokens in the destination namespace, then
/// in the source path, else the destination namespace verbatim.
pub fn environment_from_app(app: &Application) -> String {
    for key in ["environment", "env"] {
        if let Some(value) = app.metadata.labels.get(key)
            && !value.is_empty()
        {
            return value.clone();
        }
    }
    let namespace = &app.spec.destination.namespace;
    for token in ENV_TOKENS {
        if namespace.contains(token) {
            return token.to_string();
        }
    }
    for token in ENV_TOKENS {
        if app.spec.source.path.contains(token) {
            return token.to_string();
        }
    }
    namespace.clone()
}
