use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("Unknown model: {0}")]
	UnknownModel(String),

	#[error("Network error: {0}")]
	Network(String),

	#[error("Failed to load model: {0}")]
	ModelLoadFailed(String),

	#[error("Conversion failed: {0}")]
	Conversion(String),

	#[error("Invalid input: {0}")]
	InvalidInput(String),

	#[error("Configuration error: {0}")]
	Config(String),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Serialization error: {0}")]
	Serialization(String),
}

impl From<candle_core::Error> for Error {
	fn from(err: candle_core::Error) -> Self {
		Error::Conversion(err.to_string())
	}
}

impl From<prost::DecodeError> for Error {
	fn from(err: prost::DecodeError) -> Self {
		Error::Serialization(err.to_string())
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Error::Serialization(err.to_string())
	}
}

impl From<toml::de::Error> for Error {
	fn from(err: toml::de::Error) -> Self {
		Error::Serialization(err.to_string())
	}
}

impl From<toml::ser::Error> for Error {
	fn from(err: toml::ser::Error) -> Self {
		Error::Serialization(err.to_string())
	}
}

pub type Result<T> = std::result::Result<T, Error>;
