//! Bearer token attached to every outbound call.

use std::fmt;

use tonic::metadata::{Ascii, MetadataValue};
use tonic::service::Interceptor;
use tonic::{Request, Status};

use crate::error::{Error, Result};

/// Metadata key the controller reads the token from
pub const AUTHORIZATION: &str = "authorization";

/// The token identifying this server to the controller.
///
/// Implements [`Interceptor`], so the generated client applies it to every
/// unary and streaming call made through the connection.
#[derive(Clone)]
pub struct Credential {
    token: MetadataValue<Ascii>,
}

impl Credential {
    /// Validate `token` and turn it into a metadata value.
    pub fn new(token: &str) -> Result<Self> {
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::Configuration("access token is empty".into()));
        }
        let token = MetadataValue::try_from(token).map_err(|_| {
            Error::Configuration("access token contains characters not allowed in metadata".into())
        })?;
        Ok(Self { token })
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential").finish_non_exhaustive()
    }
}

impl Interceptor for Credential {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        request
            .metadata_mut()
            .insert(AUTHORIZATION, self.token.clone());
        Ok(request)
    }
}
