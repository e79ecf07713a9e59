pub mod builder;
pub mod check;
pub mod proto;
pub mod simplify;

pub use builder::GraphBuilder;
pub use check::check_model;
pub use proto::ModelProto;
pub use simplify::simplify;

use crate::error::Result;
use prost::Message;
use std::path::Path;

pub fn encode(model: &ModelProto) -> Vec<u8> {
    model.encode_to_vec()
}

pub fn decode(bytes: &[u8]) -> Result<ModelProto> {
    Ok(ModelProto::decode(bytes)?)
}

pub fn read_model(path: impl AsRef<Path>) -> Result<ModelProto> {
    let bytes = std::fs::read(path)?;
    decode(&bytes)
}
