//! Resolving which workspace to connect to.

use eyre::WrapErr as _;

pub const DEFAULT_HOST: &str = "floobits.com";
/// Default port for TLS connections.
pub const TLS_PORT: u16 = 3448;
/// Default port for plaintext connections.
pub const PLAIN_PORT: u16 = 3148;

const FLOO_FILE: &str = ".floo";

/// A resolved workspace: where the server is and which room to join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub owner: String,
    pub name: String,
}

impl Workspace {
    /// Build from explicit parts, picking the default port for the transport.
    #[must_use]
    pub fn new(host: &str, port: Option<u16>, secure: bool, owner: &str, name: &str) -> Self {
        Self {
            host: host.to_string(),
            port: port.unwrap_or(if secure { TLS_PORT } else { PLAIN_PORT }),
            secure,
            owner: owner.to_string(),
            name: name.to_string(),
        }
    }

    /// Parse `scheme://host[:port]/[r/]owner/workspace[/]`.
    pub fn parse_url(input: &str) -> eyre::Result<Self> {
        let parsed =
            url::Url::parse(input).wrap_err_with(|| format!("invalid workspace URL {input:?}"))?;

        let secure = match parsed.scheme() {
            "https" => true,
            "http" => false,
            other => eyre::bail!("unsupported scheme {other:?} in workspace URL {input:?}"),
        };
        let host = parsed
            .host_str()
            .ok_or_else(|| eyre::eyre!("workspace URL {input:?} has no host"))?;

        let mut segments: Vec<&str> = parsed
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();
        if segments.first() == Some(&"r") {
            segments.remove(0);
        }
        let [owner, name, ..] = segments.as_slice() else {
            eyre::bail!("workspace URL {input:?} must look like https://{host}/owner/workspace");
        };

        Ok(Self::new(host, parsed.port(), secure, owner, name))
    }

    /// Read the `url` recorded in a `.floo` project file.
    pub fn from_floo_file(path: &std::path::Path) -> eyre::Result<Self> {
        #[derive(serde::Deserialize)]
        struct FlooFile {
            url: String,
        }

        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read {}", path.display()))?;
        let floo: FlooFile = serde_json::from_str(&content)
            .wrap_err_with(|| format!("invalid project file {}", path.display()))?;
        Self::parse_url(&floo.url)
    }

    /// Same workspace over plaintext. A default TLS port becomes the plain one.
    #[must_use]
    pub fn without_tls(mut self) -> Self {
        if self.secure && self.port == TLS_PORT {
            self.port = PLAIN_PORT;
        }
        self.secure = false;
        self
    }

    /// The web URL of this workspace.
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}/{}/{}", self.host, self.owner, self.name)
    }
}

/// Find the nearest `.floo` file in `start` or any of its parents.
#[must_use]
pub fn find_floo_file(start: &std::path::Path) -> Option<std::path::PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(FLOO_FILE))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_https_url() {
        let ws = Workspace::parse_url("https://floobits.com/alice/project/").unwrap();
        assert_eq!(ws, Workspace::new("floobits.com", None, true, "alice", "project"));
        assert_eq!(ws.port, TLS_PORT);
        assert_eq!(ws.url(), "https://floobits.com/alice/project");
    }

    #[test]
    fn test_parse_http_url_with_port() {
        let ws = Workspace::parse_url("http://localhost:8080/r/bob/scratch").unwrap();
        assert!(!ws.secure);
        assert_eq!(ws.host, "localhost");
        assert_eq!(ws.port, 8080);
        assert_eq!(ws.owner, "bob");
        assert_eq!(ws.name, "scratch");
    }

    #[test]
    fn test_plain_default_port() {
        let ws = Workspace::parse_url("http://floobits.com/bob/scratch").unwrap();
        assert_eq!(ws.port, PLAIN_PORT);
    }

    #[test]
    fn test_without_tls() {
        let ws = Workspace::parse_url("https://floobits.com/alice/project").unwrap().without_tls();
        assert!(!ws.secure);
        assert_eq!(ws.port, PLAIN_PORT);

        let custom = Workspace::new("floo.local", Some(9000), true, "a", "b").without_tls();
        assert_eq!(custom.port, 9000);
    }

    #[test]
    fn test_rejects_bad_urls() {
        assert!(Workspace::parse_url("floobits.com/alice/project").is_err());
        assert!(Workspace::parse_url("ftp://floobits.com/alice/project").is_err());
        assert!(Workspace::parse_url("https://floobits.com/alice").is_err());
    }

    #[test]
    fn test_floo_file_in_parent() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("src").join("deep");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            dir.path().join(".floo"),
            r#"{"url": "https://floobits.com/alice/project", "hooks": {}}"#,
        )
        .unwrap();

        let found = find_floo_file(&nested).unwrap();
        assert_eq!(found, dir.path().join(".floo"));
        let ws = Workspace::from_floo_file(&found).unwrap();
        assert_eq!(ws.owner, "alice");
        assert_eq!(ws.name, "project");
    }

    #[test]
    fn test_floo_file_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".floo");
        std::fs::write(&path, "{not json").unwrap();
        assert!(Workspace::from_floo_file(&path).is_err());
    }
}
