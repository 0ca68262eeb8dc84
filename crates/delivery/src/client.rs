//! HTTP client for payload fetch attempts
//!
//! One client per selected source, built from that source kind's parameter
//! row. Resumed transfers use a byte-range request and require a 206; a
//! server that ignores the range would silently corrupt the running digest.

use crate::config::FetchParams;
use reqwest::{Client, Response, StatusCode};
use upd_errors::{Error, NetworkError};
use url::Url;

/// HTTP client wrapper parameterized by a source-kind row
#[derive(Debug, Clone)]
pub struct FetchClient {
    client: Client,
    max_redirects: u32,
}

impl FetchClient {
    /// Build a client for the given parameter row
    ///
    /// # Errors
    /// Returns an error if the underlying client cannot be constructed.
    pub fn new(params: &FetchParams) -> Result<Self, Error> {
        let client = Client::builder()
            .connect_timeout(params.connect_timeout)
            // A socket that stops producing bytes for a whole low-speed
            // window is as dead as one below the speed floor
            .read_timeout(params.low_speed_window)
            .redirect(reqwest::redirect::Policy::limited(
                usize::try_from(params.max_redirects).unwrap_or(usize::MAX),
            ))
            .user_agent(concat!("upd/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NetworkError::ConnectionRefused(e.to_string()))?;

        Ok(Self {
            client,
            max_redirects: params.max_redirects,
        })
    }

    /// Open the payload at `url` starting from `offset`
    ///
    /// # Errors
    /// Returns a transient network error on connection problems, redirect
    /// overflow, HTTP error status, or a server that cannot resume.
    pub async fn get_range(&self, url: &str, offset: u64) -> Result<Response, Error> {
        let parsed = Url::parse(url).map_err(|e| NetworkError::InvalidUrl(e.to_string()))?;
        match parsed.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(NetworkError::InvalidUrl(format!(
                    "unsupported scheme {scheme}"
                ))
                .into())
            }
        }

        let mut request = self.client.get(parsed);
        if offset > 0 {
            request = request.header(reqwest::header::RANGE, format!("bytes={offset}-"));
        }

        let response = request.send().await.map_err(|e| self.map_error(url, &e))?;
        validate_status(&response, offset)?;
        Ok(response)
    }

    fn map_error(&self, url: &str, error: &reqwest::Error) -> Error {
        if error.is_timeout() {
            NetworkError::Timeout {
                url: url.to_string(),
            }
            .into()
        } else if error.is_redirect() {
            NetworkError::TooManyRedirects {
                limit: self.max_redirects,
            }
            .into()
        } else if error.is_connect() {
            NetworkError::ConnectionRefused(error.to_string()).into()
        } else {
            NetworkError::DownloadFailed(error.to_string()).into()
        }
    }
}

fn validate_status(response: &Response, offset: u64) -> Result<(), Error> {
    let status = response.status();
    if offset > 0 {
        if status != StatusCode::PARTIAL_CONTENT {
            return Err(NetworkError::RangeNotSupported { offset }.into());
        }
    } else if !status.is_success() {
        return Err(NetworkError::HttpError {
            status: status.as_u16(),
            message: status.to_string(),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeliveryConfig, FetchParams};
    use upd_types::DownloadSource;

    fn client() -> FetchClient {
        let params = FetchParams::for_source(DownloadSource::HttpServer, &DeliveryConfig::default());
        FetchClient::new(&params).unwrap()
    }

    #[tokio::test]
    async fn rejects_non_http_schemes() {
        let err = client().get_range("file:///etc/passwd", 0).await.unwrap_err();
        assert!(matches!(err, Error::Network(NetworkError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn rejects_malformed_urls() {
        let err = client().get_range("not a url", 0).await.unwrap_err();
        assert!(matches!(err, Error::Network(NetworkError::InvalidUrl(_))));
    }
}
