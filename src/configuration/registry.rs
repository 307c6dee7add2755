use crate::error::ConfigError;
use serde_json::Value;

pub const DISCRIMINATOR: &str = "type";

pub type Constructor<T> = fn(Value) -> Result<T, serde_json::Error>;

/// A closed family of stage variants selected by their `type` field.
///
/// Each family lists every variant once in `REGISTRY`; adding a variant means
/// adding an entry there, decoding itself never changes.
pub trait Family: Sized + 'static {
    const NAME: &'static str;
    const REGISTRY: &'static [(&'static str, Constructor<Self>)];
}

/// Builds a registry entry that decodes the whole fragment into `$variant`'s
/// payload. Variant types apply their own defaults while decoding.
#[macro_export]
macro_rules! variant {
    ($kind:literal => $variant:path) => {
        ($kind, |fragment| serde_json::from_value(fragment).map($variant))
    };
}

pub fn decode<T: Family>(fragment: Value) -> Result<T, ConfigError> {
    let kind = discriminator::<T>(&fragment)?;
    let construct = T::REGISTRY
        .iter()
        .find(|(name, _)| *name == kind)
        .map(|(_, construct)| *construct)
        .ok_or_else(|| ConfigError::UnknownDiscriminator {
            family: T::NAME,
            value: kind.clone(),
            expected: kinds::<T>().collect::<Vec<_>>().join(", "),
        })?;
    trace!("Decoding {} of type {}", T::NAME, kind);
    construct(fragment).map_err(|source| ConfigError::Malformed {
        family: T::NAME,
        kind,
        source,
    })
}

pub fn kinds<T: Family>() -> impl Iterator<Item = &'static str> {
    T::REGISTRY.iter().map(|(name, _)| *name)
}

/// Shallow pre-parse: only `type` is looked at.
fn discriminator<T: Family>(fragment: &Value) -> Result<String, ConfigError> {
    fragment
        .get(DISCRIMINATOR)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or(ConfigError::MissingDiscriminator { family: T::NAME })
}
