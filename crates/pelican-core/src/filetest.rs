//! File-transfer test runs
//!
//! A test run exercises a data-plane endpoint end to end: PUT a known body
//! under `/pelican/monitoring/`, GET it back and compare bytes, then DELETE
//! it. The origin self-test and the director health prober both run these,
//! differing only in the test type and in who mints the token.
//!
//! For a run to work, the issuer must be registered with the data plane as a
//! trusted token issuer and publish its keys at the WLCG well-known path.

use chrono::{SecondsFormat, Utc};
use std::time::Duration;
use url::Url;

use crate::error::{PelicanError, Result};
use crate::keys::IssuerKey;
use crate::token::{TokenConfig, TokenProfile};

/// The flavor of a test run; decides the object name and body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestType {
    /// Origin probing its own data plane
    SelfTest,
    /// Director probing an origin's data plane
    DirectorTest,
}

impl TestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::SelfTest => "self-test",
            TestType::DirectorTest => "director-test",
        }
    }

    /// The constant body uploaded by this test flavor.
    pub fn body(&self) -> &'static str {
        match self {
            TestType::SelfTest => {
                "This object was created by the Pelican self-test functionality"
            }
            TestType::DirectorTest => {
                "This object was created by the Pelican director-test functionality"
            }
        }
    }
}

impl std::fmt::Display for TestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Issues upload/download/delete cycles against a data-plane endpoint.
#[derive(Clone)]
pub struct FileTest {
    client: reqwest::Client,
    issuer_url: Url,
    key: IssuerKey,
}

impl FileTest {
    pub fn new(client: reqwest::Client, issuer_url: Url, key: IssuerKey) -> Self {
        Self {
            client,
            issuer_url,
            key,
        }
    }

    /// Run one full test: upload, download with byte-exact comparison, then
    /// delete. The delete is attempted whenever the upload succeeded, even
    /// after a failed download, so probe objects never accumulate.
    pub async fn run(&self, base_url: &Url, test_type: TestType) -> Result<()> {
        let object_url = self.upload(base_url, test_type).await?;

        let download_result = self.download(base_url, &object_url, test_type.body()).await;
        let delete_result = self.delete(base_url, &object_url).await;

        download_result?;
        delete_result
    }

    /// Monitoring tokens live for one minute and are bound to the data-plane
    /// endpoint under test.
    fn monitoring_token(&self, audience: &Url) -> Result<String> {
        TokenConfig {
            profile: TokenProfile::Monitoring,
            issuer: self.issuer_url.clone(),
            audience: vec![audience.as_str().trim_end_matches('/').to_string()],
            subject: "origin".into(),
            lifetime: Duration::from_secs(60),
            scopes: vec!["storage.read:/".into(), "storage.modify:/".into()],
        }
        .mint(&self.key)
    }

    async fn upload(&self, base_url: &Url, test_type: TestType) -> Result<Url> {
        let token = self.monitoring_token(base_url)?;
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut object_url = base_url.clone();
        object_url.set_path(&format!(
            "/pelican/monitoring/{}-{}.txt",
            test_type, timestamp
        ));

        let response = self
            .client
            .put(object_url.clone())
            .bearer_auth(&token)
            .body(test_type.body())
            .send()
            .await?;

        if response.status().as_u16() >= 300 {
            return Err(PelicanError::Transient(format!(
                "test file upload to {} returned {}",
                object_url,
                response.status()
            )));
        }
        Ok(object_url)
    }

    async fn download(&self, base_url: &Url, object_url: &Url, expected_body: &str) -> Result<()> {
        let token = self.monitoring_token(base_url)?;
        let response = self
            .client
            .get(object_url.clone())
            .bearer_auth(&token)
            .send()
            .await?;

        if response.status().as_u16() >= 300 {
            return Err(PelicanError::Transient(format!(
                "test file download from {} returned {}",
                object_url,
                response.status()
            )));
        }

        let body = response.bytes().await?;
        if body.as_ref() != expected_body.as_bytes() {
            return Err(PelicanError::Protocol(format!(
                "test file content mismatch: got {} bytes",
                body.len()
            )));
        }
        Ok(())
    }

    async fn delete(&self, base_url: &Url, object_url: &Url) -> Result<()> {
        let token = self.monitoring_token(base_url)?;
        let response = self
            .client
            .delete(object_url.clone())
            .bearer_auth(&token)
            .send()
            .await?;

        if response.status().as_u16() >= 300 {
            return Err(PelicanError::Transient(format!(
                "test file deletion at {} returned {}",
                object_url,
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names_and_bodies() {
        assert_eq!(TestType::SelfTest.as_str(), "self-test");
        assert_eq!(TestType::DirectorTest.as_str(), "director-test");
        assert!(TestType::SelfTest.body().contains("self-test"));
        assert!(TestType::DirectorTest.body().contains("director-test"));
    }

    #[test]
    fn test_monitoring_token_audience_is_target() {
        let key = IssuerKey::generate();
        let test = FileTest::new(
            reqwest::Client::new(),
            Url::parse("https://origin.example.com:8444").unwrap(),
            key.clone(),
        );

        let audience = Url::parse("https://origin.example.com:8443").unwrap();
        let token = test.monitoring_token(&audience).unwrap();

        let claims = crate::token::verify_with_jwks(
            &token,
            &key.public_jwks(),
            "https://origin.example.com:8443",
            &["storage.modify:/"],
        )
        .unwrap();
        assert_eq!(claims.iss, "https://origin.example.com:8444");
    }
}
