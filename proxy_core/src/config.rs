use std::fs;
use std::io;
use std::io::ErrorKind;
use std::path::Path;

/// One inbound listener: an address to bind plus the front-end protocol it
/// should speak (`http-connect` or `socks5`).
#[derive(Debug, Clone)]
pub struct ListenConfig {
    pub host: String,
    pub port: u16,
    pub front_end: FrontEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontEnd {
    HttpConnect,
    Socks5,
}

/// MitM splice settings: which CONNECT targets get intercepted, and where
/// the root CA material lives.
#[derive(Debug, Clone, Default)]
pub struct MitmConfig {
    pub enabled: bool,
    pub host_patterns: Vec<String>,
    pub root_cert_path: Option<String>,
    pub root_key_path: Option<String>,
}

/// Template for the VMESS session keys a server-side (or dialing) component
/// should construct for a given outbound user. Mirrors the data model's
/// per-session fields that are configuration-time constants rather than
/// values negotiated per connection.
#[derive(Debug, Clone)]
pub struct VmessTemplate {
    pub user_id: String, // UUID text form
    pub content_security: String,
}

/// Top-level runtime configuration (simple key=value / minimal-YAML format,
/// same parsing style as the rest of this crate's config tooling).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listeners: Vec<ListenConfig>,
    pub locale: String,
    pub credential_identity: Option<String>,
    pub credential_token: Option<String>,
    pub mitm: MitmConfig,
    pub vmess: Option<VmessTemplate>,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    InvalidFormat(String),
    MissingField(&'static str),
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl ServerConfig {
    /// Load configuration from a minimal YAML file. The subset understood is:
    ///
    /// ```yaml
    /// server:
    ///   listen:
    ///     - "0.0.0.0:8080 http-connect"
    ///     - "0.0.0.0:1080 socks5"
    ///   locale: "ja"
    ///   credential:
    ///     identity: "user"
    ///     token: "pass"
    ///   mitm:
    ///     enabled: true
    ///     host_patterns:
    ///       - "*.example.com"
    ///     root_cert: "./certs/root.pem"
    ///     root_key: "./certs/root.key"
    ///   vmess:
    ///     user_id: "b831381d-6324-4d53-ad4f-8cda48b30811"
    ///     content_security: "aes-128-gcm"
    /// ```
    pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(ConfigError::Io(e)),
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let mut listeners = Vec::new();
        let mut locale: Option<String> = None;
        let mut credential_identity: Option<String> = None;
        let mut credential_token: Option<String> = None;
        let mut mitm = MitmConfig::default();
        let mut vmess: Option<VmessTemplate> = None;
        let mut vmess_user_id: Option<String> = None;
        let mut vmess_security: Option<String> = None;

        let mut in_server = false;
        let mut server_indent: Option<usize> = None;

        let mut lines = content.lines().peekable();
        while let Some(line_raw) = lines.next() {
            let trimmed = line_raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let indent = line_raw.chars().take_while(|c| c.is_whitespace()).count();

            if !in_server {
                if trimmed.starts_with("server:") {
                    in_server = true;
                    server_indent = Some(indent);
                }
                continue;
            }

            if let Some(si) = server_indent {
                if indent <= si {
                    in_server = false;
                    continue;
                }
            }

            if trimmed.starts_with("listen:") {
                let listen_indent = indent;
                while let Some(peek) = lines.peek() {
                    let p_indent = peek.chars().take_while(|c| c.is_whitespace()).count();
                    let p_trim = peek.trim();
                    if p_indent <= listen_indent {
                        break;
                    }
                    if let Some(entry) = p_trim.strip_prefix('-') {
                        let entry = entry.trim().trim_matches(|c| c == '"' || c == '\'');
                        if let Some(parsed) = parse_listen_entry(entry) {
                            listeners.push(parsed);
                        }
                    }
                    let _ = lines.next();
                }
            } else if trimmed.starts_with("locale:") {
                locale = scalar_value(trimmed);
            } else if trimmed.starts_with("credential:") {
                let cred_indent = indent;
                while let Some(peek) = lines.peek() {
                    let p_indent = peek.chars().take_while(|c| c.is_whitespace()).count();
                    if p_indent <= cred_indent {
                        break;
                    }
                    let p_trim = peek.trim();
                    if p_trim.starts_with("identity:") {
                        credential_identity = scalar_value(p_trim);
                    } else if p_trim.starts_with("token:") {
                        credential_token = scalar_value(p_trim);
                    }
                    let _ = lines.next();
                }
            } else if trimmed.starts_with("mitm:") {
                let mitm_indent = indent;
                while let Some(peek) = lines.peek() {
                    let p_indent = peek.chars().take_while(|c| c.is_whitespace()).count();
                    if p_indent <= mitm_indent {
                        break;
                    }
                    let p_trim = peek.trim();
                    if p_trim.starts_with("enabled:") {
                        mitm.enabled = scalar_value(p_trim).map(|v| v == "true").unwrap_or(false);
                        let _ = lines.next();
                    } else if p_trim.starts_with("host_patterns:") {
                        let patterns_indent = p_indent;
                        let _ = lines.next();
                        while let Some(inner) = lines.peek() {
                            let i_indent = inner.chars().take_while(|c| c.is_whitespace()).count();
                            let i_trim = inner.trim();
                            if i_indent <= patterns_indent {
                                break;
                            }
                            if let Some(pat) = i_trim.strip_prefix('-') {
                                mitm.host_patterns.push(pat.trim().trim_matches(|c| c == '"' || c == '\'').to_string());
                            }
                            let _ = lines.next();
                        }
                    } else if p_trim.starts_with("root_cert:") {
                        mitm.root_cert_path = scalar_value(p_trim);
                        let _ = lines.next();
                    } else if p_trim.starts_with("root_key:") {
                        mitm.root_key_path = scalar_value(p_trim);
                        let _ = lines.next();
                    } else {
                        let _ = lines.next();
                    }
                }
            } else if trimmed.starts_with("vmess:") {
                let vmess_indent = indent;
                while let Some(peek) = lines.peek() {
                    let p_indent = peek.chars().take_while(|c| c.is_whitespace()).count();
                    if p_indent <= vmess_indent {
                        break;
                    }
                    let p_trim = peek.trim();
                    if p_trim.starts_with("user_id:") {
                        vmess_user_id = scalar_value(p_trim);
                    } else if p_trim.starts_with("content_security:") {
                        vmess_security = scalar_value(p_trim);
                    }
                    let _ = lines.next();
                }
            }
        }

        if let (Some(user_id), Some(content_security)) = (vmess_user_id, vmess_security) {
            vmess = Some(VmessTemplate { user_id, content_security });
        }

        if listeners.is_empty() {
            return Err(ConfigError::MissingField("listen"));
        }

        Ok(ServerConfig {
            listeners,
            locale: locale.ok_or(ConfigError::MissingField("locale"))?,
            credential_identity,
            credential_token,
            mitm,
            vmess,
        })
    }
}

fn scalar_value(trimmed: &str) -> Option<String> {
    trimmed
        .splitn(2, ':')
        .nth(1)
        .map(|v| v.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
}

fn parse_listen_entry(entry: &str) -> Option<ListenConfig> {
    let mut parts = entry.split_whitespace();
    let addr = parts.next()?;
    let front_end = match parts.next() {
        Some("socks5") => FrontEnd::Socks5,
        _ => FrontEnd::HttpConnect,
    };
    let (host, port_str) = addr.rsplit_once(':')?;
    let port = port_str.parse::<u16>().ok()?;
    Some(ListenConfig { host: host.to_string(), port, front_end })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let path = std::env::temp_dir().join(format!(
            "proxy_core_config_test_{:?}.yaml",
            std::thread::current().id()
        ));
        std::fs::write(
            &path,
            "server:\n  listen:\n    - \"0.0.0.0:1080 socks5\"\n    - \"0.0.0.0:8080 http-connect\"\n  locale: \"en\"\n  mitm:\n    enabled: true\n    host_patterns:\n      - \"*.example.com\"\n    root_cert: \"root.pem\"\n    root_key: \"root.key\"\n  vmess:\n    user_id: \"b831381d-6324-4d53-ad4f-8cda48b30811\"\n    content_security: \"aes-128-gcm\"\n",
        )
        .unwrap();

        let cfg = ServerConfig::load_from_yaml(&path).expect("config should parse");
        std::fs::remove_file(&path).ok();

        assert_eq!(cfg.listeners.len(), 2);
        assert_eq!(cfg.listeners[0].front_end, FrontEnd::Socks5);
        assert_eq!(cfg.listeners[1].front_end, FrontEnd::HttpConnect);
        assert!(cfg.mitm.enabled);
        assert_eq!(cfg.mitm.host_patterns, vec!["*.example.com".to_string()]);
        assert!(cfg.vmess.is_some());
    }
}
