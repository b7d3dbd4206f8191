//! Shadow-type synthesis.
//!
//! A [`ShadowType`] describes the fields a decoder should accept for some
//! destination struct: one entry under each field's own name, plus one entry
//! per alias declared with `#[facet(yaml_aliases = "...")]`. Every entry
//! carries the [`Slot`] of the destination field it writes to, so all the
//! names accepted for a field converge on the same storage.

use std::collections::{HashMap, HashSet};

use facet_core::{Facet, Field, FieldAttribute, Shape, Type, UserType};

use crate::error::{AliasError, AliasErrorKind};

/// Name of the field attribute that declares aliases.
pub const ALIAS_ATTR: &str = "yaml_aliases";

/// Infix used to name the shadow fields generated for aliases.
pub const ALIAS_FIELD_INFIX: &str = "YamlAlias";

/// Handle to one field of the destination struct (its field index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot(usize);

impl Slot {
    /// Index of the field in the destination struct's field list.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Everything the synthesizer knows about one exported destination field.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// Serialization name. Facet applies `rename` to the field name itself,
    /// so this is also the key the field is decoded from.
    pub name: &'static str,
    /// Declared storage type, carried into every [`ShadowField`] of the field.
    pub shape: &'static Shape,
    /// `None` when no alias attribute is present at all.
    pub aliases: Option<Vec<&'static str>>,
    /// Where the field lives in a destination instance.
    pub slot: Slot,
}

impl FieldDescriptor {
    /// Describes the field at `index`, or returns `None` for unexported fields.
    pub fn from_field(index: usize, field: &'static Field) -> Option<Self> {
        if is_unexported(field) {
            log::trace!("Skipping unexported field `{}`", field.name);
            return None;
        }

        let aliases = alias_declaration(field).map(|raw| raw.split(',').collect());

        Some(FieldDescriptor {
            name: field.name,
            shape: field.shape,
            aliases,
            slot: Slot(index),
        })
    }
}

/// One accepted name in a shadow type.
#[derive(Debug, Clone)]
pub struct ShadowField {
    /// Name of the shadow field, unique within its [`ShadowType`].
    pub name: String,
    /// The mapping key that selects this field.
    pub key: &'static str,
    /// Type of the destination field. Aliases share it with their primary.
    pub shape: &'static Shape,
    /// The destination field written when this key is decoded.
    pub slot: Slot,
}

impl PartialEq for ShadowField {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.key == other.key
            && self.slot == other.slot
            && self.shape.type_identifier == other.shape.type_identifier
    }
}

/// Field layout accepted when decoding into some destination struct.
#[derive(Debug, Clone)]
pub struct ShadowType {
    target: &'static Shape,
    slot_count: usize,
    fields: Vec<ShadowField>,
    by_key: HashMap<&'static str, usize>,
}

impl PartialEq for ShadowType {
    fn eq(&self, other: &Self) -> bool {
        self.slot_count == other.slot_count
            && self.fields == other.fields
            && self.target.type_identifier == other.target.type_identifier
    }
}

impl ShadowType {
    /// Synthesizes the shadow type of `T`.
    ///
    /// # Panics
    ///
    /// Panics if `T`'s alias declarations produce two shadow fields with the
    /// same name or the same key. That is a mistake in the type declaration,
    /// not in any input, and calling this from a test catches it early.
    pub fn of<T: Facet<'static>>() -> Result<Self, AliasError> {
        Self::synthesize(T::SHAPE)
    }

    /// Synthesizes the shadow type of the struct described by `shape`.
    ///
    /// # Panics
    ///
    /// See [`ShadowType::of`].
    pub fn synthesize(shape: &'static Shape) -> Result<Self, AliasError> {
        let Type::User(UserType::Struct(struct_def)) = &shape.ty else {
            return Err(AliasErrorKind::NotAStruct(shape).into());
        };

        let mut shadow = ShadowType {
            target: shape,
            slot_count: struct_def.fields.len(),
            fields: Vec::with_capacity(struct_def.fields.len()),
            by_key: HashMap::with_capacity(struct_def.fields.len()),
        };
        let mut names = HashSet::with_capacity(struct_def.fields.len());

        for (index, field) in struct_def.fields.iter().enumerate() {
            let Some(descriptor) = FieldDescriptor::from_field(index, field) else {
                continue;
            };

            shadow.push(
                &mut names,
                descriptor.name.to_string(),
                descriptor.name,
                &descriptor,
            );

            for (j, alias) in descriptor.aliases.iter().flatten().copied().enumerate() {
                let name = format!("{}{ALIAS_FIELD_INFIX}{j}", descriptor.name);
                shadow.push(&mut names, name, alias, &descriptor);
            }
        }

        log::debug!(
            "Synthesized shadow of {} with {} fields",
            shape,
            shadow.fields.len()
        );

        Ok(shadow)
    }

    fn push(
        &mut self,
        names: &mut HashSet<String>,
        name: String,
        key: &'static str,
        descriptor: &FieldDescriptor,
    ) {
        if !names.insert(name.clone()) {
            panic!(
                "shadow field name `{name}` is declared twice in {}",
                self.target
            );
        }
        if let Some(&existing) = self.by_key.get(key) {
            panic!(
                "key '{key}' of shadow field `{name}` is already accepted by `{}` in {}",
                self.fields[existing].name, self.target
            );
        }

        let slot = descriptor.slot;
        log::trace!("Shadow field `{name}` accepts '{key}' for slot {}", slot.0);
        self.by_key.insert(key, self.fields.len());
        self.fields.push(ShadowField {
            name,
            key,
            shape: descriptor.shape,
            slot,
        });
    }

    /// The destination shape this shadow was synthesized from.
    pub fn target(&self) -> &'static Shape {
        self.target
    }

    /// Shadow fields in emission order.
    pub fn fields(&self) -> &[ShadowField] {
        &self.fields
    }

    /// Number of fields in the destination struct, exported or not.
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Finds the shadow field that accepts `key`.
    pub fn lookup(&self, key: &str) -> Option<&ShadowField> {
        self.by_key.get(key).map(|&index| &self.fields[index])
    }

    /// Type of the destination field at `index`, if that field is exported.
    pub fn slot_shape(&self, index: usize) -> Option<&'static Shape> {
        self.fields
            .iter()
            .find(|field| field.slot.0 == index)
            .map(|field| field.shape)
    }

    /// Every key this shadow accepts, in emission order.
    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|field| field.key)
    }

    /// The keys accepted for one destination field.
    pub fn keys_for(&self, slot: Slot) -> impl Iterator<Item = &'static str> + '_ {
        self.fields
            .iter()
            .filter(move |field| field.slot == slot)
            .map(|field| field.key)
    }
}

/// A [`ShadowType`] bound to the live destination it decodes into.
pub struct Shadow<'dest, T> {
    ty: ShadowType,
    dest: &'dest mut T,
}

impl<'dest, T: Facet<'static>> Shadow<'dest, T> {
    /// The synthesized field layout.
    pub fn ty(&self) -> &ShadowType {
        &self.ty
    }

    pub(crate) fn into_parts(self) -> (ShadowType, &'dest mut T) {
        (self.ty, self.dest)
    }
}

/// Synthesizes the shadow type of `T` and binds it to `dest`.
///
/// # Panics
///
/// See [`ShadowType::of`].
pub fn synthesize<T: Facet<'static>>(dest: &mut T) -> Result<Shadow<'_, T>, AliasError> {
    let ty = ShadowType::of::<T>()?;
    Ok(Shadow { ty, dest })
}

/// Fields marked `#[facet(skip)]` are not part of the wire format.
pub(crate) fn is_unexported(field: &Field) -> bool {
    field
        .attributes
        .contains(&FieldAttribute::Arbitrary("skip"))
}

fn alias_declaration(field: &Field) -> Option<&'static str> {
    field.attributes.iter().find_map(|attr| match attr {
        FieldAttribute::Arbitrary(raw) => parse_alias_attr(*raw),
        _ => None,
    })
}

/// Extracts the value of `yaml_aliases = "..."` from a raw attribute.
fn parse_alias_attr(raw: &'static str) -> Option<&'static str> {
    let rest = raw.trim().strip_prefix(ALIAS_ATTR)?.trim_start();
    let value = rest.strip_prefix('=')?.trim();
    Some(
        value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value),
    )
}
