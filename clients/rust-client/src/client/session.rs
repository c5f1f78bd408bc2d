use super::Connection;
use crate::protocol::{ClientError, ClientResult, NsUserAuth};

impl Connection {
    /// Select the namespace for the rest of the session.
    pub async fn use_namespace(&self, ns: &str) -> ClientResult<()> {
        if ns.is_empty() {
            return Err(ClientError::NoNamespace);
        }

        let session = self.session().await?;
        session
            .call(&self.ids, self.config.timeout, "use", (ns, None::<&str>))
            .await?;

        *session.namespace.write() = Some(ns.to_string());
        Ok(())
    }

    /// Select a database inside the current namespace.
    pub async fn use_database(&self, db: &str) -> ClientResult<()> {
        let session = self.session().await?;
        let ns = session
            .namespace
            .read()
            .clone()
            .ok_or(ClientError::NoNamespace)?;

        session
            .call(&self.ids, self.config.timeout, "use", (ns.as_str(), db))
            .await?;

        *session.database.write() = Some(db.to_string());
        Ok(())
    }

    /// Sign in as a namespace user.
    pub async fn signin(&self, user: &str, pass: &str) -> ClientResult<()> {
        let session = self.session().await?;
        let ns = session
            .namespace
            .read()
            .clone()
            .ok_or(ClientError::NoNamespace)?;

        let auth = NsUserAuth {
            ns,
            user: user.to_string(),
            pass: pass.to_string(),
        };
        session
            .call(&self.ids, self.config.timeout, "signin", [auth])
            .await?;

        Ok(())
    }
}
