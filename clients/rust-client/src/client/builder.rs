use std::time::Duration;

use url::Url;

use super::Connection;
use crate::protocol::{ClientError, ClientResult};

/// Response window of a single call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(45);
/// Limit on the close handshake
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_RPC_PATH: &str = "/rpc";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Fresh per call, measured from the moment the request is written.
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub close_timeout: Duration,
    pub secure: bool,
    pub rpc_path: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            secure: false,
            rpc_path: DEFAULT_RPC_PATH.to_string(),
        }
    }
}

impl ClientConfig {
    pub(crate) fn rpc_url(&self, host: &str) -> ClientResult<Url> {
        let scheme = if self.secure { "wss" } else { "ws" };
        let path = self.rpc_path.trim_start_matches('/');

        Url::parse(&format!("{}://{}/{}", scheme, host, path))
            .map_err(|e| ClientError::Dial(format!("Invalid host '{}': {}", host, e)))
    }
}

struct Credentials {
    user: String,
    pass: String,
}

/// Configures a [`Connection`] and optionally walks it through namespace,
/// signin and database selection right after connecting.
pub struct ConnectionBuilder {
    host: String,
    config: ClientConfig,
    namespace: Option<String>,
    database: Option<String>,
    auth: Option<Credentials>,
}

impl ConnectionBuilder {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            config: ClientConfig::default(),
            namespace: None,
            database: None,
            auth: None,
        }
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeout = Duration::from_millis(ms);
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout = Duration::from_millis(ms);
        self
    }

    pub fn close_timeout_ms(mut self, ms: u64) -> Self {
        self.config.close_timeout = Duration::from_millis(ms);
        self
    }

    /// Dial `wss://` instead of `ws://`.
    pub fn secure(mut self) -> Self {
        self.config.secure = true;
        self
    }

    pub fn rpc_path(mut self, path: &str) -> Self {
        self.config.rpc_path = path.to_string();
        self
    }

    pub fn namespace(mut self, ns: &str) -> Self {
        self.namespace = Some(ns.to_string());
        self
    }

    pub fn database(mut self, db: &str) -> Self {
        self.database = Some(db.to_string());
        self
    }

    /// Sign in after selecting the namespace. Requires [`Self::namespace`].
    pub fn auth(mut self, user: &str, pass: &str) -> Self {
        self.auth = Some(Credentials {
            user: user.to_string(),
            pass: pass.to_string(),
        });
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Build a disconnected connection carrying this configuration.
    pub fn build(self) -> Connection {
        Connection::with_config(self.config)
    }

    /// Connect and run the configured session steps. The connection is
    /// closed again if any step fails.
    pub async fn connect(self) -> ClientResult<Connection> {
        let conn = Connection::with_config(self.config);
        conn.connect(&self.host).await?;

        let setup = async {
            if let Some(ns) = &self.namespace {
                conn.use_namespace(ns).await?;
            }
            if let Some(auth) = &self.auth {
                conn.signin(&auth.user, &auth.pass).await?;
            }
            if let Some(db) = &self.database {
                conn.use_database(db).await?;
            }
            Ok::<_, ClientError>(())
        };

        if let Err(e) = setup.await {
            if let Err(close_err) = conn.close().await {
                tracing::warn!("Failed to close connection after setup error: {}", close_err);
            }
            return Err(e);
        }

        Ok(conn)
    }
}
