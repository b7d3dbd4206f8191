#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

use facet_core::Facet;

mod deserialize;
mod error;
mod scalar;
pub mod shadow;

pub use deserialize::Mode;
pub use error::{AliasError, AliasErrorKind, Location};
pub use shadow::{ALIAS_ATTR, ALIAS_FIELD_INFIX, Shadow, ShadowField, ShadowType, Slot, synthesize};

/// Result type for aliased YAML decoding.
pub type Result<T> = std::result::Result<T, AliasError>;

/// Decode YAML into an existing value, accepting aliases for field names.
///
/// Each field is selected by its own name or by any name listed in its
/// `#[facet(yaml_aliases = "...")]` attribute. Keys that match nothing are
/// ignored, and fields the input does not mention keep their current value.
///
/// # Example
/// ```
/// # use facet::Facet;
/// #[derive(Facet, Debug, Default, PartialEq)]
/// struct Account {
///     #[facet(yaml_aliases = "userName,user-name")]
///     username: String,
///     active: bool,
/// }
///
/// # fn main() -> Result<(), facet_yaml_alias::AliasError> {
/// let mut account = Account { username: String::new(), active: true };
/// facet_yaml_alias::decode("user-name: ferris", &mut account)?;
/// assert_eq!(account.username, "ferris");
/// assert!(account.active);
/// # Ok(())
/// # }
/// ```
///
/// # Destination type
///
/// While the input is merged, the destination is moved into facet's builder
/// and a `T::default()` stands in for it, so `T` must implement [`Default`].
///
/// ```compile_fail
/// use facet::Facet;
///
/// #[derive(Facet)]
/// struct Endpoint {
///     port: u16,
/// }
///
/// let mut endpoint = Endpoint { port: 80 };
/// facet_yaml_alias::decode("port: 8080", &mut endpoint).unwrap();
/// ```
///
/// # Panics
///
/// Panics if `T` declares the same key for two fields, or if an alias
/// collides with a generated shadow field name. See [`ShadowType::of`].
pub fn decode<T>(input: &str, dest: &mut T) -> Result<()>
where
    T: Facet<'static> + Default,
{
    decode_with(input, dest, Mode::Lenient)
}

/// Like [`decode`], but rejects keys that match no field or alias, and keys
/// repeated within one mapping.
///
/// ```
/// # use facet::Facet;
/// #[derive(Facet, Debug, Default)]
/// struct Cache {
///     #[facet(yaml_aliases = "ttl")]
///     time_to_live: u32,
/// }
///
/// let mut cache = Cache::default();
/// assert!(facet_yaml_alias::decode_strict("foo: 5", &mut cache).is_err());
/// assert_eq!(cache.time_to_live, 0);
/// ```
pub fn decode_strict<T>(input: &str, dest: &mut T) -> Result<()>
where
    T: Facet<'static> + Default,
{
    decode_with(input, dest, Mode::Strict)
}

/// Decode YAML into `dest` in the given [`Mode`].
///
/// If the input is rejected, `dest` holds the value it had before the call.
pub fn decode_with<T>(input: &str, dest: &mut T, mode: Mode) -> Result<()>
where
    T: Facet<'static> + Default,
{
    log::trace!("Entering `decode_with` function");

    let shadow = synthesize(dest)?;
    deserialize::decode_shadow(input, shadow, mode)
}

/// Decode YAML into a fresh `T::default()`.
pub fn from_str<T>(input: &str) -> Result<T>
where
    T: Facet<'static> + Default,
{
    let mut value = T::default();
    decode(input, &mut value)?;
    Ok(value)
}

/// Strict counterpart of [`from_str`].
pub fn from_str_strict<T>(input: &str) -> Result<T>
where
    T: Facet<'static> + Default,
{
    let mut value = T::default();
    decode_strict(input, &mut value)?;
    Ok(value)
}
