#![allow(dead_code)]

use anyhow::{Context, Result};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};

use school_api::app;
use school_api::config::{AppConfig, BootstrapAdmin};

pub const ADMIN_USERNAME: &str = "root";
pub const ADMIN_PASSWORD: &str = "root-password";

pub struct TestServer {
    pub base_url: String,
    client: reqwest::Client,
}

impl TestServer {
    /// Serve a fresh app (empty store, seeded superadmin) on an unused port
    pub async fn start() -> Result<Self> {
        let mut config = AppConfig::development();
        config.api.enable_request_logging = false;
        config.security.jwt_secret = "integration-test-secret".to_string();
        config.security.bootstrap_admin = Some(BootstrapAdmin {
            username: ADMIN_USERNAME.to_string(),
            password: ADMIN_PASSWORD.to_string(),
        });

        let state = app::build_state(config).await?;
        let router = app::router(state);

        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .context("failed to bind test listener")?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Ok(Self {
            base_url: format!("http://127.0.0.1:{}", port),
            client: reqwest::Client::new(),
        })
    }

    pub async fn get(&self, path: &str) -> Result<(StatusCode, Value)> {
        let res = self.client.get(format!("{}{}", self.base_url, path)).send().await?;
        let status = res.status();
        Ok((status, res.json().await?))
    }

    /// Call `/api/:module/:method` and return the status plus the envelope
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value)> {
        let mut req = self.client.request(method, format!("{}/api/{}", self.base_url, path));
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }

        let res = req.send().await?;
        let status = res.status();
        let envelope: Value = res.json().await.context("response was not JSON")?;
        Ok((status, envelope))
    }

    pub async fn post(&self, path: &str, token: Option<&str>, body: Value) -> Result<(StatusCode, Value)> {
        self.call(Method::POST, path, token, Some(body)).await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<String> {
        let (status, body) = self
            .post("user/loginUser", None, json!({ "username": username, "password": password }))
            .await?;
        anyhow::ensure!(status == StatusCode::OK, "login failed: {}", body);
        body["data"]["token"]
            .as_str()
            .map(str::to_string)
            .context("login response has no token")
    }

    pub async fn admin_token(&self) -> Result<String> {
        self.login(ADMIN_USERNAME, ADMIN_PASSWORD).await
    }

    /// Create a school and return its id
    pub async fn create_school(&self, token: &str, name: &str) -> Result<String> {
        let (status, body) = self
            .post(
                "school/createSchool",
                Some(token),
                json!({ "name": name, "address": "1 School Lane" }),
            )
            .await?;
        anyhow::ensure!(status == StatusCode::CREATED, "createSchool failed: {}", body);
        body["data"]["id"].as_str().map(str::to_string).context("school has no id")
    }

    /// Create a school admin for `school_id` and return a token for them
    pub async fn school_admin_token(&self, admin_token: &str, username: &str, school_id: &str) -> Result<String> {
        let (status, body) = self
            .post(
                "user/createUser",
                Some(admin_token),
                json!({
                    "username": username,
                    "password": "principal-pass",
                    "role": "school_admin",
                    "school_id": school_id,
                }),
            )
            .await?;
        anyhow::ensure!(status == StatusCode::CREATED, "createUser failed: {}", body);
        self.login(username, "principal-pass").await
    }
}
