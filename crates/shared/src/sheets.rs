//! Task queue backed by a Google spreadsheet.
//!
//! Layout of the first sheet, one task per row starting at row 2:
//!
//! | A       | B     | C            | D         | E      | F       |
//! |---------|-------|--------------|-----------|--------|---------|
//! | project | topic | `tg,ig`      | scheduled | status | post id |

use anyhow::{Context, Result};
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::SheetsConfig;
use crate::models::{Task, TaskStatus};

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const TASK_RANGE: &str = "A2:F";
const FIRST_DATA_ROW: u32 = 2;
const MIN_CELLS: usize = 5;
/// Refresh this long before the token actually expires.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Where pending tasks come from and where their outcome goes.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn pending_tasks(&self) -> Result<Vec<Task>>;

    /// Record a task outcome; `false` when the write did not happen.
    async fn update_status(&self, row_number: u32, status: TaskStatus, post_id: Option<&str>)
        -> bool;
}

/// `authorized_user` credentials as written by `gcloud auth application-default login`.
#[derive(Deserialize)]
struct AuthorizedUser {
    client_id: String,
    client_secret: String,
    refresh_token: String,
    token_uri: Option<String>,
}

/// Key file downloaded for a service account that the sheet is shared with.
#[derive(Deserialize)]
struct ServiceAccount {
    client_email: String,
    private_key: String,
    token_uri: Option<String>,
}

/// The two credential files Google tooling produces. A file without a
/// `type` field is read as `authorized_user`.
enum GoogleCredentials {
    AuthorizedUser(AuthorizedUser),
    ServiceAccount(ServiceAccount),
}

impl GoogleCredentials {
    fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw).context("credentials are not valid JSON")?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("authorized_user")
            .to_string();
        match kind.as_str() {
            "authorized_user" => serde_json::from_value(value)
                .map(GoogleCredentials::AuthorizedUser)
                .context("invalid authorized_user credentials"),
            "service_account" => serde_json::from_value(value)
                .map(GoogleCredentials::ServiceAccount)
                .context("invalid service_account credentials"),
            other => anyhow::bail!("Unsupported Google credentials type: {}", other),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

/// RS256-signed JWT asserting `account` for the spreadsheets scope.
fn sign_assertion(account: &ServiceAccount, token_url: &str, issued_at: i64) -> Result<String> {
    let claims = AssertionClaims {
        iss: account.client_email.clone(),
        scope: SHEETS_SCOPE.to_string(),
        aud: token_url.to_string(),
        iat: issued_at,
        exp: issued_at + ASSERTION_LIFETIME_SECS,
    };
    let key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())
        .context("service account private_key is not an RSA PEM key")?;
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
        .context("Failed to sign service account assertion")
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

struct CachedToken {
    token: Secret<String>,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Serialize)]
struct UpdateRequest<'a> {
    range: &'a str,
    #[serde(rename = "majorDimension")]
    major_dimension: &'static str,
    values: [[&'a str; 1]; 1],
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Turn the `A2:F` block into pending tasks. Short rows and rows with any
/// other status are skipped; row numbers are 1-based sheet rows.
pub fn parse_rows(rows: &[Vec<Value>]) -> Vec<Task> {
    rows.iter()
        .enumerate()
        .filter(|(_, row)| row.len() >= MIN_CELLS)
        .filter_map(|(idx, row)| {
            let cells: Vec<String> = row.iter().map(cell_text).collect();
            let status = cells[4].parse::<TaskStatus>().ok()?;
            if status != TaskStatus::Pending {
                return None;
            }

            Some(Task {
                row_number: Some(idx as u32 + FIRST_DATA_ROW),
                project: cells[0].clone(),
                topic: cells[1].clone(),
                platforms: cells[2]
                    .split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect(),
                scheduled_at: Some(cells[3].clone()).filter(|s| !s.is_empty()),
                status,
            })
        })
        .collect()
}

pub struct SheetsQueue {
    client: Client,
    spreadsheet_id: Option<String>,
    credentials_file: PathBuf,
    api_base: String,
    token: Mutex<Option<CachedToken>>,
}

impl SheetsQueue {
    pub fn new(config: &SheetsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            spreadsheet_id: config.spreadsheet_id.clone(),
            credentials_file: config.credentials_file.clone(),
            api_base: SHEETS_API_BASE.to_string(),
            token: Mutex::new(None),
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn spreadsheet_id(&self) -> Result<&str> {
        self.spreadsheet_id
            .as_deref()
            .context("GOOGLE_SHEETS_ID is not set")
    }

    fn values_url(&self, spreadsheet_id: &str, range: &str) -> String {
        format!(
            "{}/v4/spreadsheets/{}/values/{}",
            self.api_base,
            urlencoding::encode(spreadsheet_id),
            urlencoding::encode(range)
        )
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + REFRESH_MARGIN < token.expires_at {
                return Ok(token.token.expose_secret().clone());
            }
        }

        let fresh = self.refresh_access_token().await?;
        let token = fresh.token.expose_secret().clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn refresh_access_token(&self) -> Result<CachedToken> {
        let raw = tokio::fs::read_to_string(&self.credentials_file)
            .await
            .with_context(|| {
                format!(
                    "Failed to read Google credentials: {}",
                    self.credentials_file.display()
                )
            })?;
        let credentials = GoogleCredentials::parse(&raw).with_context(|| {
            format!(
                "Unusable Google credentials file: {}",
                self.credentials_file.display()
            )
        })?;

        let (token_url, form_params) = match &credentials {
            GoogleCredentials::AuthorizedUser(user) => {
                let token_url = user.token_uri.as_deref().unwrap_or(GOOGLE_TOKEN_URL);
                let params = vec![
                    ("client_id", user.client_id.clone()),
                    ("client_secret", user.client_secret.clone()),
                    ("refresh_token", user.refresh_token.clone()),
                    ("grant_type", "refresh_token".to_string()),
                ];
                (token_url, params)
            }
            GoogleCredentials::ServiceAccount(account) => {
                let token_url = account.token_uri.as_deref().unwrap_or(GOOGLE_TOKEN_URL);
                let assertion =
                    sign_assertion(account, token_url, chrono::Utc::now().timestamp())?;
                let params = vec![
                    ("grant_type", JWT_BEARER_GRANT.to_string()),
                    ("assertion", assertion),
                ];
                (token_url, params)
            }
        };

        let response = self
            .client
            .post(token_url)
            .form(&form_params)
            .send()
            .await
            .context("Failed to reach Google token endpoint")?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Google token request failed: {}", body);
        }

        let body: TokenResponse = response
            .json()
            .await
            .context("Failed to parse Google token response")?;
        let access_token = body
            .access_token
            .context("No access_token in Google token response")?;

        debug!("obtained Google access token");
        Ok(CachedToken {
            token: Secret::new(access_token),
            expires_at: Instant::now() + Duration::from_secs(body.expires_in.unwrap_or(3600)),
        })
    }

    async fn write_cell(&self, spreadsheet_id: &str, range: &str, value: &str) -> Result<()> {
        let token = self.access_token().await?;
        let request = UpdateRequest {
            range,
            major_dimension: "ROWS",
            values: [[value]],
        };

        let response = self
            .client
            .put(self.values_url(spreadsheet_id, range))
            .query(&[("valueInputOption", "RAW")])
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to write {}", range))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Sheets API error {} writing {}: {}", status, range, body);
        }
        Ok(())
    }

    async fn try_update_status(
        &self,
        row_number: u32,
        status: TaskStatus,
        post_id: Option<&str>,
    ) -> Result<()> {
        let spreadsheet_id = self.spreadsheet_id()?;
        self.write_cell(spreadsheet_id, &format!("E{}", row_number), status.as_str())
            .await?;
        if let Some(post_id) = post_id.filter(|id| !id.is_empty()) {
            self.write_cell(spreadsheet_id, &format!("F{}", row_number), post_id)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for SheetsQueue {
    async fn pending_tasks(&self) -> Result<Vec<Task>> {
        let spreadsheet_id = self.spreadsheet_id()?;
        let token = self.access_token().await?;

        let response = self
            .client
            .get(self.values_url(spreadsheet_id, TASK_RANGE))
            .bearer_auth(token)
            .send()
            .await
            .context("Failed to read task sheet")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Sheets API error {}: {}", status, body);
        }

        let range: ValueRange = response
            .json()
            .await
            .context("Failed to parse task sheet")?;

        let tasks = parse_rows(&range.values);
        info!(count = tasks.len(), "found pending tasks");
        Ok(tasks)
    }

    async fn update_status(
        &self,
        row_number: u32,
        status: TaskStatus,
        post_id: Option<&str>,
    ) -> bool {
        match self.try_update_status(row_number, status, post_id).await {
            Ok(()) => {
                info!(row = row_number, status = %status, "task status updated");
                true
            }
            Err(e) => {
                warn!(row = row_number, error = %e, "failed to update task status");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;
    use std::io::Write;

    const TASK_RANGE_PATH: &str = r"^/v4/spreadsheets/sheet-1/values/A2(%3A|:)F$";

    fn rows(value: Value) -> Vec<Vec<Value>> {
        serde_json::from_value(value).unwrap()
    }

    fn credentials_file(token_uri: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let body = json!({
            "type": "authorized_user",
            "client_id": "client-id",
            "client_secret": "client-secret",
            "refresh_token": "refresh-me",
            "token_uri": token_uri,
        });
        file.write_all(body.to_string().as_bytes()).unwrap();
        file
    }

    fn queue_for(server: &mockito::ServerGuard, credentials: &tempfile::NamedTempFile) -> SheetsQueue {
        SheetsQueue::new(&SheetsConfig {
            spreadsheet_id: Some("sheet-1".to_string()),
            credentials_file: credentials.path().to_path_buf(),
        })
        .unwrap()
        .with_api_base(server.url())
    }

    const SERVICE_ACCOUNT_KEY: &str = include_str!("../testdata/service_account_key.pem");
    const SERVICE_ACCOUNT_PUBLIC_KEY: &str = include_str!("../testdata/service_account_key.pub.pem");

    fn service_account_file(token_uri: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let body = json!({
            "type": "service_account",
            "project_id": "autopost",
            "private_key_id": "key-1",
            "private_key": SERVICE_ACCOUNT_KEY,
            "client_email": "autopost@autopost.iam.gserviceaccount.com",
            "client_id": "1234567890",
            "token_uri": token_uri,
        });
        file.write_all(body.to_string().as_bytes()).unwrap();
        file
    }

    async fn mock_token(server: &mut mockito::ServerGuard) -> mockito::Mock {
        server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "refresh-me".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"ya29.test","expires_in":3600}"#)
            .create_async()
            .await
    }

    #[test]
    fn test_parse_rows_selects_pending() {
        let tasks = parse_rows(&rows(json!([
            ["RouteOfRest", "Turkey", "tg, ig", "2024-05-01 10:00", "Pending", ""],
            ["NBot", "Bots", "tg", "2024-05-01 11:00", "done", "42"],
            ["NBot", "Short row"],
            [],
            ["NBot", "Income", "tg", "", "PENDING"]
        ])));

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].row_number, Some(2));
        assert_eq!(tasks[0].platforms, vec!["tg".to_string(), "ig".to_string()]);
        assert_eq!(tasks[0].scheduled_at.as_deref(), Some("2024-05-01 10:00"));
        assert_eq!(tasks[1].row_number, Some(6));
        assert_eq!(tasks[1].topic, "Income");
        assert_eq!(tasks[1].scheduled_at, None);
    }

    #[test]
    fn test_parse_rows_ignores_unknown_status() {
        let tasks = parse_rows(&rows(json!([["NBot", "Bots", "tg", "", "later"]])));
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_pending_tasks_reads_sheet() {
        let mut server = mockito::Server::new_async().await;
        let credentials = credentials_file(&format!("{}/token", server.url()));
        let token = mock_token(&mut server).await;
        let read = server
            .mock("GET", Matcher::Regex(TASK_RANGE_PATH.to_string()))
            .match_header("authorization", "Bearer ya29.test")
            .with_status(200)
            .with_body(
                json!({
                    "range": "Sheet1!A2:F10",
                    "values": [["NBot", "Bots", "tg", "", "pending"]]
                })
                .to_string(),
            )
            .create_async()
            .await;
        let queue = queue_for(&server, &credentials);

        let tasks = queue.pending_tasks().await.unwrap();
        // Second read reuses the cached token.
        queue.pending_tasks().await.unwrap();

        token.expect(1).assert_async().await;
        read.expect(2).assert_async().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].project, "NBot");
    }

    #[tokio::test]
    async fn test_empty_sheet_has_no_tasks() {
        let mut server = mockito::Server::new_async().await;
        let credentials = credentials_file(&format!("{}/token", server.url()));
        let _token = mock_token(&mut server).await;
        let _read = server
            .mock("GET", Matcher::Regex(TASK_RANGE_PATH.to_string()))
            .with_status(200)
            .with_body(r#"{"range":"Sheet1!A2:F"}"#)
            .create_async()
            .await;
        let queue = queue_for(&server, &credentials);

        assert!(queue.pending_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pending_tasks_without_sheet_id_fails() {
        let queue = SheetsQueue::new(&SheetsConfig {
            spreadsheet_id: None,
            credentials_file: PathBuf::from("/no/such/credentials.json"),
        })
        .unwrap();

        let err = queue.pending_tasks().await.unwrap_err();
        assert!(err.to_string().contains("GOOGLE_SHEETS_ID"));
    }

    #[tokio::test]
    async fn test_update_status_writes_status_and_post_id() {
        let mut server = mockito::Server::new_async().await;
        let credentials = credentials_file(&format!("{}/token", server.url()));
        let _token = mock_token(&mut server).await;
        let status = server
            .mock("PUT", "/v4/spreadsheets/sheet-1/values/E7")
            .match_query(Matcher::UrlEncoded("valueInputOption".into(), "RAW".into()))
            .match_body(Matcher::PartialJson(json!({ "values": [["done"]] })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        let post_id = server
            .mock("PUT", "/v4/spreadsheets/sheet-1/values/F7")
            .match_query(Matcher::UrlEncoded("valueInputOption".into(), "RAW".into()))
            .match_body(Matcher::PartialJson(json!({ "values": [["123"]] })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        let queue = queue_for(&server, &credentials);

        assert!(queue.update_status(7, TaskStatus::Done, Some("123")).await);

        status.assert_async().await;
        post_id.assert_async().await;
    }

    #[tokio::test]
    async fn test_update_status_error_skips_post_id() {
        let mut server = mockito::Server::new_async().await;
        let credentials = credentials_file(&format!("{}/token", server.url()));
        let _token = mock_token(&mut server).await;
        let status = server
            .mock("PUT", "/v4/spreadsheets/sheet-1/values/E3")
            .match_query(Matcher::Any)
            .match_body(Matcher::PartialJson(json!({ "values": [["error"]] })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        let post_id = server
            .mock("PUT", "/v4/spreadsheets/sheet-1/values/F3")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let queue = queue_for(&server, &credentials);

        assert!(queue.update_status(3, TaskStatus::Error, None).await);

        status.assert_async().await;
        post_id.assert_async().await;
    }

    #[tokio::test]
    async fn test_update_status_reports_api_failure() {
        let mut server = mockito::Server::new_async().await;
        let credentials = credentials_file(&format!("{}/token", server.url()));
        let _token = mock_token(&mut server).await;
        let _write = server
            .mock("PUT", "/v4/spreadsheets/sheet-1/values/E4")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body(r#"{"error":{"message":"forbidden"}}"#)
            .create_async()
            .await;
        let queue = queue_for(&server, &credentials);

        assert!(!queue.update_status(4, TaskStatus::Done, Some("1")).await);
    }

    #[test]
    fn test_sign_assertion_is_verifiable_rs256_jwt() {
        let account = ServiceAccount {
            client_email: "autopost@autopost.iam.gserviceaccount.com".to_string(),
            private_key: SERVICE_ACCOUNT_KEY.to_string(),
            token_uri: None,
        };
        let now = chrono::Utc::now().timestamp();

        let assertion = sign_assertion(&account, GOOGLE_TOKEN_URL, now).unwrap();

        let key = jsonwebtoken::DecodingKey::from_rsa_pem(SERVICE_ACCOUNT_PUBLIC_KEY.as_bytes())
            .unwrap();
        let mut validation = jsonwebtoken::Validation::new(Algorithm::RS256);
        validation.set_audience(&[GOOGLE_TOKEN_URL]);
        validation.set_issuer(&["autopost@autopost.iam.gserviceaccount.com"]);
        let decoded =
            jsonwebtoken::decode::<AssertionClaims>(&assertion, &key, &validation).unwrap();

        assert_eq!(decoded.header.alg, Algorithm::RS256);
        assert_eq!(decoded.claims.scope, SHEETS_SCOPE);
        assert_eq!(decoded.claims.iat, now);
        assert_eq!(decoded.claims.exp, now + 3600);
    }

    #[tokio::test]
    async fn test_service_account_exchanges_signed_assertion() {
        let mut server = mockito::Server::new_async().await;
        let credentials = service_account_file(&format!("{}/token", server.url()));
        let token = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), JWT_BEARER_GRANT.into()),
                Matcher::Regex(r"assertion=[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"ya29.service","expires_in":3600}"#)
            .create_async()
            .await;
        let read = server
            .mock("GET", Matcher::Regex(TASK_RANGE_PATH.to_string()))
            .match_header("authorization", "Bearer ya29.service")
            .with_status(200)
            .with_body(json!({ "values": [["RouteOfRest", "Turkey", "ig", "", "pending"]] }).to_string())
            .create_async()
            .await;
        let queue = queue_for(&server, &credentials);

        let tasks = queue.pending_tasks().await.unwrap();

        token.assert_async().await;
        read.assert_async().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].platforms, vec!["ig".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_credentials_type_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"type":"external_account","audience":"x"}"#)
            .unwrap();
        let queue = SheetsQueue::new(&SheetsConfig {
            spreadsheet_id: Some("sheet-1".to_string()),
            credentials_file: file.path().to_path_buf(),
        })
        .unwrap();

        let err = queue.pending_tasks().await.unwrap_err();
        assert!(format!("{:#}", err).contains("external_account"));
    }
}
