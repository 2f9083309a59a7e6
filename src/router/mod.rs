//! Request router
//!
//! Classifies an incoming request into one of the two operations the server
//! understands and extracts the session name:
//!
//! - `POST /<name>` -> [`Route::Upload`]
//! - `GET /close?fileName=<name>` -> [`Route::Close`]

mod mime;

pub use mime::extension_for;

use crate::session::SessionError;
use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use thiserror::Error;

/// Path of the cancellation endpoint
pub const CLOSE_PATH: &str = "/close";

/// Query parameter carrying the session name on the close endpoint
pub const CLOSE_NAME_PARAM: &str = "fileName";

/// Router errors
#[derive(Error, Debug, PartialEq)]
pub enum RouterError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Method {0} not allowed")]
    MethodNotAllowed(String),

    #[error("Publication name is missing (cannot be empty)")]
    MissingName,
}

impl From<RouterError> for SessionError {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::MethodNotAllowed(method) => SessionError::MethodNotAllowed(method),
            other => SessionError::Validation(other.to_string()),
        }
    }
}

/// Operations understood by the server
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Stream the request body into the sink called `name`
    Upload { name: String },
    /// Cancel the in-flight upload called `name`
    Close { name: String },
}

/// Request parser
pub struct RequestRouter;

impl RequestRouter {
    /// Parse method, path and query into a [`Route`]
    pub fn parse(method: &str, path: &str, query: Option<&str>) -> Result<Route, RouterError> {
        match method.to_ascii_uppercase().as_str() {
            "POST" => Ok(Route::Upload {
                name: Self::name_from_path(path)?,
            }),
            "GET" => {
                if path.trim_end_matches('/') != CLOSE_PATH {
                    return Err(RouterError::InvalidPath(format!(
                        "GET is only supported on {}",
                        CLOSE_PATH
                    )));
                }
                let name = Self::parse_query(query)
                    .remove(CLOSE_NAME_PARAM)
                    .filter(|name| !name.is_empty())
                    .ok_or(RouterError::MissingName)?;
                Ok(Route::Close { name })
            }
            _ => Err(RouterError::MethodNotAllowed(method.to_string())),
        }
    }

    /// Final path segment, percent-decoded. Trailing slashes are ignored.
    pub fn name_from_path(path: &str) -> Result<String, RouterError> {
        let segment = path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default();

        if segment.is_empty() {
            return Err(RouterError::MissingName);
        }
        decode(segment)
    }

    fn parse_query(query: Option<&str>) -> HashMap<String, String> {
        let mut params = HashMap::new();
        if let Some(q) = query {
            for pair in q.split('&') {
                let mut kv = pair.splitn(2, '=');
                if let Some(key) = kv.next() {
                    let value = kv.next().unwrap_or("");
                    if let (Ok(key), Ok(value)) = (decode(key), decode(value)) {
                        params.insert(key, value);
                    }
                }
            }
        }
        params
    }
}

fn decode(raw: &str) -> Result<String, RouterError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| RouterError::InvalidPath(format!("'{}' is not valid UTF-8", raw)))
}
