use thiserror::Error;

use crate::value::ValueType;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    MQTTOptionError(#[from] rumqttc::OptionError),

    #[error(transparent)]
    MQTTClientError(#[from] rumqttc::ClientError),

    #[error(transparent)]
    MQTTConnectionError(#[from] rumqttc::ConnectionError),

    #[error(transparent)]
    JSONError(#[from] serde_json::Error),

    #[error(transparent)]
    Device(#[from] neura_webdialog::Error),

    #[error("Timed out")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("{raw:?} is not a valid {value_type}")]
    InvalidValue { raw: String, value_type: ValueType },

    #[error("Invalid config: {0}")]
    Config(std::borrow::Cow<'static, str>),

    #[error("{0}")]
    Other(std::borrow::Cow<'static, str>),
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Self::Other(s.into())
    }
}
impl From<&'static str> for Error {
    fn from(s: &'static str) -> Self {
        Self::Other(s.into())
    }
}
