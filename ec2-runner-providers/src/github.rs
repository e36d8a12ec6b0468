use crate::ControlPlane;
use anyhow::Result;
use async_trait::async_trait;
use ec2_runner_common::{Repository, Worker, WorkerStatus};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const PER_PAGE: usize = 100;

pub struct GitHubControlPlane {
    client: Client,
    api_base: String,
    token: String,
    repository: Repository,
}

impl GitHubControlPlane {
    pub fn new(token: String, repository: Repository) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .user_agent(concat!("ec2-runner/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_base: "https://api.github.com".to_string(),
            token: token.trim().to_string(),
            repository,
        })
    }

    /// GitHub Enterprise or a test server.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn runners_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/actions/runners",
            self.api_base, self.repository.owner, self.repository.repo
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }
}

#[derive(Deserialize)]
struct RegistrationTokenResponse {
    token: String,
}

#[derive(Deserialize)]
struct RunnersPage {
    total_count: usize,
    #[serde(default)]
    runners: Vec<RunnerItem>,
}

#[derive(Deserialize)]
struct RunnerItem {
    id: u64,
    name: String,
    status: String,
    #[serde(default)]
    labels: Vec<RunnerLabel>,
}

#[derive(Deserialize)]
struct RunnerLabel {
    name: String,
}

impl From<RunnerItem> for Worker {
    fn from(r: RunnerItem) -> Self {
        Worker {
            id: r.id,
            name: r.name,
            status: WorkerStatus::parse(&r.status),
            labels: r.labels.into_iter().map(|l| l.name).collect(),
        }
    }
}

#[async_trait]
impl ControlPlane for GitHubControlPlane {
    fn repository(&self) -> &Repository {
        &self.repository
    }

    async fn registration_token(&self) -> Result<String> {
        let url = format!("{}/registration-token", self.runners_url());
        let resp = self.request(reqwest::Method::POST, &url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            tracing::error!("[github] registration token request failed: status={}", status.as_u16());
            return Err(anyhow::anyhow!(
                "GitHub registration token failed: status={} body={}",
                status.as_u16(),
                text
            ));
        }
        let body: RegistrationTokenResponse = resp.json().await?;
        tracing::info!("[github] registration token is received");
        Ok(body.token)
    }

    async fn list_workers(&self) -> Result<Vec<Worker>> {
        let url = self.runners_url();
        let mut workers = Vec::new();
        let mut page = 1usize;
        loop {
            let resp = self
                .request(reqwest::Method::GET, &url)
                .query(&[("per_page", PER_PAGE), ("page", page)])
                .send()
                .await?;
            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(anyhow::anyhow!(
                    "GitHub list runners failed: status={} body={}",
                    status.as_u16(),
                    text
                ));
            }
            let body: RunnersPage = resp.json().await?;
            let received = body.runners.len();
            workers.extend(body.runners.into_iter().map(Worker::from));
            if received < PER_PAGE || workers.len() >= body.total_count {
                break;
            }
            page += 1;
        }
        Ok(workers)
    }

    async fn delete_worker(&self, worker_id: u64) -> Result<()> {
        let url = format!("{}/{}", self.runners_url(), worker_id);
        let resp = self.request(reqwest::Method::DELETE, &url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "GitHub delete runner {} failed: status={} body={}",
                worker_id,
                status.as_u16(),
                text
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runner_page_maps_to_workers() {
        let json = r#"{
          "total_count": 2,
          "runners": [
            {"id": 23, "name": "ip-10-0-0-1", "os": "linux", "status": "online", "busy": false,
             "labels": [{"id": 1, "name": "self-hosted", "type": "read-only"}, {"id": 9, "name": "k3x9q", "type": "custom"}]},
            {"id": 24, "name": "ip-10-0-0-2", "os": "linux", "status": "offline", "busy": false, "labels": []}
          ]
        }"#;
        let page: RunnersPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.total_count, 2);
        let workers: Vec<Worker> = page.runners.into_iter().map(Worker::from).collect();
        assert_eq!(workers[0].id, 23);
        assert!(workers[0].is_online());
        assert_eq!(workers[0].labels, vec!["self-hosted", "k3x9q"]);
        assert_eq!(workers[1].status, WorkerStatus::Offline);
    }

    #[test]
    fn runners_url_uses_repository() {
        let cp = GitHubControlPlane::new(
            "tok".into(),
            Repository::parse("acme/widgets").unwrap(),
        )
        .unwrap()
        .with_api_base("https://ghe.example.com/api/v3/");
        assert_eq!(
            cp.runners_url(),
            "https://ghe.example.com/api/v3/repos/acme/widgets/actions/runners"
        );
    }
}
