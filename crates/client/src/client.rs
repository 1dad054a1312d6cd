//! Delivery service REST client.
//!
//! Team-scoped calls authenticate with the user token; package-scoped calls
//! with the package access token returned at package creation.

use packdrop_protocol::constants::{
    DEFAULT_API_BASE_URL, PACKAGE_TOKEN_HEADER, PART_NUMBER_QUERY_KEY, USER_TOKEN_HEADER,
};
use packdrop_protocol::messages::{
    ApiKeyRequest, ApiKeyResponse, AuthRequest, AuthResponse, CreatePackageRequest,
    CreatePackageResponse, FinalizeFileRequest, RegisterFileRequest, RegisterFileResponse,
    UploadUrlEntry, UploadUrlsRequest,
};
use packdrop_protocol::types::{Blueprint, PartDestination};
use packdrop_protocol::xml::{XmlError, parse_upload_id};
use packdrop_upload::{
    Credentials, DeliveryService, FileRegistration, PackageHandle, ServiceError, ServiceFuture,
};
use reqwest::{RequestBuilder, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// State given to API keys created by this client.
const API_KEY_STATE_ACTIVE: &str = "active";

/// Errors from the delivery service client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("upload initiation response: {0}")]
    Xml(#[from] XmlError),

    #[error("invalid destination URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("missing {0}")]
    MissingCredentials(&'static str),
}

impl From<Error> for ServiceError {
    fn from(err: Error) -> Self {
        match err {
            Error::Http(e) if e.is_timeout() => ServiceError::Timeout,
            Error::Http(e) => ServiceError::Transport(e.to_string()),
            Error::Api { status, body } => ServiceError::Status { status, body },
            Error::Json(e) => ServiceError::InvalidResponse(e.to_string()),
            Error::Xml(e) => ServiceError::InvalidResponse(e.to_string()),
            e @ Error::InvalidUrl { .. } => ServiceError::InvalidResponse(e.to_string()),
            e @ Error::MissingCredentials(_) => ServiceError::Contract(e.to_string()),
        }
    }
}

/// Delivery service API client.
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    user_token: Option<String>,
    team_id: Option<String>,
}

impl Client {
    /// Creates a client without credentials, enough for [`Client::authenticate`].
    pub fn new() -> Result<Self, Error> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: DEFAULT_API_BASE_URL.to_string(),
            user_token: None,
            team_id: None,
        })
    }

    /// Creates a client for team-scoped calls.
    pub fn with_credentials(credentials: &Credentials) -> Result<Self, Error> {
        let mut client = Self::new()?;
        client.user_token = Some(credentials.user_token.clone());
        client.team_id = Some(credentials.team_id.clone());
        Ok(client)
    }

    /// Points the client at another API root.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn user_token(&self) -> Result<&str, Error> {
        self.user_token
            .as_deref()
            .ok_or(Error::MissingCredentials("user token"))
    }

    fn team_id(&self) -> Result<&str, Error> {
        self.team_id
            .as_deref()
            .ok_or(Error::MissingCredentials("team id"))
    }

    /// Sends a request and returns the body of a 2xx response.
    async fn send(&self, request: RequestBuilder) -> Result<Vec<u8>, Error> {
        let resp = request.send().await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(resp.bytes().await?.to_vec())
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, Error> {
        let body = self.send(request).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn post_as_user<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<RequestBuilder, Error> {
        Ok(self
            .http
            .post(self.url(path))
            .header(USER_TOKEN_HEADER, self.user_token()?)
            .json(body))
    }

    fn post_as_package(&self, path: &str, package: &PackageHandle) -> RequestBuilder {
        self.http
            .post(self.url(path))
            .header(PACKAGE_TOKEN_HEADER, &package.package_token)
    }

    // -----------------------------------------------------------------------
    // Credentials
    // -----------------------------------------------------------------------

    /// Exchanges account credentials for a user token.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<AuthResponse, Error> {
        let body = AuthRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        self.send_json(self.http.post(self.url("/auth")).json(&body))
            .await
    }

    /// Creates an active API key for the team.
    pub async fn create_api_key(&self, name: &str, expiry: &str) -> Result<ApiKeyResponse, Error> {
        let body = ApiKeyRequest {
            name: name.to_string(),
            expiry: expiry.to_string(),
            state: API_KEY_STATE_ACTIVE.to_string(),
        };
        let path = format!("/teams/{}/api_keys", self.team_id()?);
        self.send_json(self.post_as_user(&path, &body)?).await
    }

    /// Renames, re-dates or re-activates an existing API key.
    pub async fn update_api_key(
        &self,
        key_id: &str,
        request: &ApiKeyRequest,
    ) -> Result<ApiKeyResponse, Error> {
        let req = self
            .http
            .put(self.url(&format!("/api_keys/{key_id}")))
            .header(USER_TOKEN_HEADER, self.user_token()?)
            .json(request);
        self.send_json(req).await
    }

    // -----------------------------------------------------------------------
    // Packages
    // -----------------------------------------------------------------------

    /// Creates an empty team package.
    pub async fn create_package(
        &self,
        name: &str,
        description: &str,
        recipients: &[String],
    ) -> Result<PackageHandle, Error> {
        let body = CreatePackageRequest {
            name: name.to_string(),
            description: description.to_string(),
            recipients: recipients.to_vec(),
        };
        let path = format!("/teams/{}/packages", self.team_id()?);
        let resp: CreatePackageResponse = self.send_json(self.post_as_user(&path, &body)?).await?;
        debug!(package_id = %resp.id, "package created");
        Ok(PackageHandle {
            package_id: resp.id,
            package_token: resp.access_token,
        })
    }

    /// Adds a file entry to a package.
    pub async fn register_file(
        &self,
        package: &PackageHandle,
        file: &RegisterFileRequest,
    ) -> Result<FileRegistration, Error> {
        let path = format!("/packages/{}/files", package.package_id);
        let resp: RegisterFileResponse = self
            .send_json(self.post_as_package(&path, package).json(file))
            .await?;
        let limits = resp.limits();
        Ok(FileRegistration {
            file_id: resp.file.id,
            blueprint: resp.create_blueprint,
            limits,
        })
    }

    /// Calls the storage initiation endpoint of `blueprint` and returns the
    /// upload id from its XML response.
    pub async fn initiate_upload(&self, blueprint: &Blueprint) -> Result<String, Error> {
        let mut req = self.http.post(&blueprint.url);
        for (name, value) in &blueprint.headers {
            req = req.header(name, value);
        }
        let body = self.send(req).await?;
        let upload_id = parse_upload_id(&String::from_utf8_lossy(&body))?;
        debug!(upload_id = %upload_id, "upload initiated");
        Ok(upload_id)
    }

    /// Requests `count` part destinations for an initiated upload.
    pub async fn upload_urls(
        &self,
        package: &PackageHandle,
        file_id: &str,
        upload_id: &str,
        count: u32,
    ) -> Result<Vec<PartDestination>, Error> {
        let path = format!("/packages/{}/files/{file_id}", package.package_id);
        let body = UploadUrlsRequest {
            upload_id: upload_id.to_string(),
        };
        let entries: Vec<UploadUrlEntry> = self
            .send_json(
                self.post_as_package(&path, package)
                    .query(&[("start", 0), ("count", count)])
                    .json(&body),
            )
            .await?;
        entries.into_iter().map(to_destination).collect()
    }

    /// Commits a file's parts.
    pub async fn finalize_file(
        &self,
        package: &PackageHandle,
        file_id: &str,
        request: &FinalizeFileRequest,
    ) -> Result<(), Error> {
        let path = format!("/packages/{}/files/{file_id}/finalize", package.package_id);
        self.send(self.post_as_package(&path, package).json(request))
            .await?;
        Ok(())
    }

    /// Commits the package and notifies its recipients.
    pub async fn finalize_package(&self, package: &PackageHandle) -> Result<(), Error> {
        let path = format!("/packages/{}/finalize", package.package_id);
        self.send(self.post_as_package(&path, package)).await?;
        Ok(())
    }
}

/// Converts a URL-issuance entry, taking the part number from the URL's
/// query string when the entry does not carry one.
fn to_destination(entry: UploadUrlEntry) -> Result<PartDestination, Error> {
    let part_number = match entry.part_number {
        Some(n) => n,
        None => part_number_from_url(&entry.url)?,
    };
    Ok(PartDestination {
        part_number,
        url: entry.url,
    })
}

fn part_number_from_url(url: &str) -> Result<u32, Error> {
    let invalid = |reason: &str| Error::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };
    let parsed = Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
    let value = parsed
        .query_pairs()
        .find(|(k, _)| k == PART_NUMBER_QUERY_KEY)
        .map(|(_, v)| v.into_owned())
        .ok_or_else(|| invalid("no partNumber query parameter"))?;
    match value.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(invalid("partNumber is not a positive integer")),
    }
}

impl DeliveryService for Client {
    fn create_package<'a>(
        &'a self,
        name: &'a str,
        description: &'a str,
        recipients: &'a [String],
    ) -> ServiceFuture<'a, PackageHandle> {
        Box::pin(async move {
            Client::create_package(self, name, description, recipients)
                .await
                .map_err(ServiceError::from)
        })
    }

    fn register_file<'a>(
        &'a self,
        package: &'a PackageHandle,
        file: &'a RegisterFileRequest,
    ) -> ServiceFuture<'a, FileRegistration> {
        Box::pin(async move {
            Client::register_file(self, package, file)
                .await
                .map_err(ServiceError::from)
        })
    }

    fn initiate_upload<'a>(&'a self, blueprint: &'a Blueprint) -> ServiceFuture<'a, String> {
        Box::pin(async move {
            Client::initiate_upload(self, blueprint)
                .await
                .map_err(ServiceError::from)
        })
    }

    fn fetch_part_destinations<'a>(
        &'a self,
        package: &'a PackageHandle,
        file_id: &'a str,
        upload_id: &'a str,
        part_count: u32,
    ) -> ServiceFuture<'a, Vec<PartDestination>> {
        Box::pin(async move {
            self.upload_urls(package, file_id, upload_id, part_count)
                .await
                .map_err(ServiceError::from)
        })
    }

    fn finalize_file<'a>(
        &'a self,
        package: &'a PackageHandle,
        file_id: &'a str,
        request: &'a FinalizeFileRequest,
    ) -> ServiceFuture<'a, ()> {
        Box::pin(async move {
            Client::finalize_file(self, package, file_id, request)
                .await
                .map_err(ServiceError::from)
        })
    }

    fn finalize_package<'a>(&'a self, package: &'a PackageHandle) -> ServiceFuture<'a, ()> {
        Box::pin(async move {
            Client::finalize_package(self, package)
                .await
                .map_err(ServiceError::from)
        })
    }
}
