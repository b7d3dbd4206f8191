//! YAML decoding through a [`ShadowType`].
//!
//! The input is parsed once into an owned event list. Mapping entries are
//! first resolved to destination fields and only then decoded, which lets a
//! field named by several keys be written exactly once.
//!
//! Decoding walks the events twice. The first walk decodes every selected
//! value into scratch instances and reports any problem with the input while
//! the destination is still untouched. The second walk moves the destination
//! into a builder and merges the decoded values into it.

use std::collections::{HashMap, HashSet};

use facet_core::{
    Def, EnumType, Facet, NumericType, PrimitiveType, Shape, ShapeLayout, StructType, Type,
    UserType,
};
use facet_reflect::Partial;
use saphyr_parser::{Event, Parser, ScalarStyle, Span as SaphyrSpan, SpannedEventReceiver};

use crate::error::{AliasError, AliasErrorKind, Location};
use crate::scalar;
use crate::shadow::{Shadow, ShadowType, is_unexported};

type Result<T> = std::result::Result<T, AliasError>;

/// How keys that match no field are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Unknown keys are skipped.
    #[default]
    Lenient,
    /// Unknown keys and keys repeated within one mapping are errors.
    Strict,
}

/// A YAML event with owned data, anchors already expanded.
#[derive(Debug, Clone)]
enum OwnedEvent {
    StreamStart,
    StreamEnd,
    DocumentStart,
    DocumentEnd,
    Scalar { value: String, plain: bool },
    SequenceStart,
    SequenceEnd,
    MappingStart,
    MappingEnd,
}

#[derive(Debug, Clone)]
struct SpannedEvent {
    event: OwnedEvent,
    location: Location,
}

/// Replayed aliases may grow a document to this many times its parsed size.
const ALIAS_EXPANSION_RATIO: usize = 100;

/// Documents may always expand to this many events, whatever their size.
const ALIAS_EXPANSION_FLOOR: usize = 10_000;

/// The `<<` key that merges other mappings into the current one.
const MERGE_KEY: &str = "<<";

/// Collects every parser event up front, replaying anchored nodes in place
/// of the aliases that refer to them.
struct EventCollector {
    events: Vec<SpannedEvent>,
    /// Events received from the parser, before any replay.
    parsed: usize,
    /// Anchor id to the event range of the anchored node.
    anchors: HashMap<usize, (usize, usize)>,
    /// Collections still open: anchor id (0 for none) and first event index.
    open: Vec<(usize, usize)>,
    error: Option<AliasError>,
}

impl EventCollector {
    fn new() -> Self {
        Self {
            events: Vec::new(),
            parsed: 0,
            anchors: HashMap::new(),
            open: Vec::new(),
            error: None,
        }
    }

    fn push(&mut self, event: OwnedEvent, location: Location) {
        self.events.push(SpannedEvent { event, location });
    }

    fn fail(&mut self, err: AliasError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn close(&mut self) {
        if let Some((anchor, start)) = self.open.pop() {
            if anchor != 0 {
                self.anchors.insert(anchor, (start, self.events.len()));
            }
        }
    }
}

impl SpannedEventReceiver<'_> for EventCollector {
    fn on_event(&mut self, event: Event<'_>, span: SaphyrSpan) {
        if self.error.is_some() {
            return;
        }
        self.parsed += 1;

        let location = Location {
            line: span.start.line(),
            column: span.start.col() + 1,
        };
        match event {
            Event::Nothing => {}
            Event::StreamStart => self.push(OwnedEvent::StreamStart, location),
            Event::StreamEnd => self.push(OwnedEvent::StreamEnd, location),
            Event::DocumentStart(_) => self.push(OwnedEvent::DocumentStart, location),
            Event::DocumentEnd => self.push(OwnedEvent::DocumentEnd, location),
            Event::Alias(id) => match self.anchors.get(&id) {
                Some(&(start, end)) => {
                    let limit =
                        ALIAS_EXPANSION_FLOOR.max(self.parsed.saturating_mul(ALIAS_EXPANSION_RATIO));
                    if self.events.len() + (end - start) > limit {
                        log::debug!("Alias to anchor #{id} would expand past {limit} events");
                        self.fail(
                            AliasError::from(AliasErrorKind::ExcessiveAliasing { limit })
                                .at(location),
                        );
                        return;
                    }
                    log::trace!("Replaying anchor #{id} (events {start}..{end})");
                    let replay = self.events[start..end].to_vec();
                    self.events.extend(replay);
                }
                None => self.fail(AliasError::from(AliasErrorKind::UnknownAnchor(id)).at(location)),
            },
            Event::Scalar(value, style, anchor, _tag) => {
                let start = self.events.len();
                self.push(
                    OwnedEvent::Scalar {
                        value: value.into_owned(),
                        plain: matches!(style, ScalarStyle::Plain),
                    },
                    location,
                );
                if anchor != 0 {
                    self.anchors.insert(anchor, (start, start + 1));
                }
            }
            Event::SequenceStart(anchor, _tag) => {
                self.open.push((anchor, self.events.len()));
                self.push(OwnedEvent::SequenceStart, location);
            }
            Event::SequenceEnd => {
                self.push(OwnedEvent::SequenceEnd, location);
                self.close();
            }
            Event::MappingStart(anchor, _tag) => {
                self.open.push((anchor, self.events.len()));
                self.push(OwnedEvent::MappingStart, location);
            }
            Event::MappingEnd => {
                self.push(OwnedEvent::MappingEnd, location);
                self.close();
            }
        }
    }
}

/// Decodes `input` into the destination bound to `shadow`.
///
/// The destination is moved into a builder only after the input has been
/// checked. Matched values are then written through their slots into a fresh
/// `Partial`, and every field no key selected is moved over unchanged.
pub(crate) fn decode_shadow<T>(input: &str, shadow: Shadow<'_, T>, mode: Mode) -> Result<()>
where
    T: Facet<'static> + Default,
{
    let (ty, dest) = shadow.into_parts();
    log::trace!("Decoding {} through its shadow ({mode:?})", ty.target());

    let mut deserializer = YamlDeserializer::new(input, mode)?;
    deserializer.check_shadow(&ty)?;
    deserializer.pos = 0;

    let mut target = Partial::alloc::<T>()?;
    let mut original = Partial::alloc::<T>()?;
    original.inner_mut().set(std::mem::take(dest))?;

    let committed = deserializer
        .merge_shadow(target.inner_mut(), original.inner_mut(), &ty)
        .and_then(|()| target.build().map_err(AliasError::from));
    match committed {
        Ok(value) => {
            *dest = *value;
            log::trace!("Destination committed");
            Ok(())
        }
        Err(err) => {
            // Only reflection failures get here, the input was already checked
            log::warn!("Could not commit decoded value, restoring destination: {err}");
            match original.build() {
                Ok(previous) => *dest = *previous,
                Err(lost) => log::warn!("Destination left at its default: {lost}"),
            }
            Err(err)
        }
    }
}

/// Moves every field `target` has not set from `original` into `target`.
fn fill_untouched<'facet>(
    target: &mut Partial<'facet>,
    original: &mut Partial<'facet>,
    field_count: usize,
) -> Result<()> {
    for index in 0..field_count {
        if !target.is_field_set(index)? {
            target.steal_nth_field(original, index)?;
        }
    }
    Ok(())
}

/// Structs decoded key by key, as opposed to scalars, collections and
/// wrappers that are structs underneath.
fn mergeable_struct(shape: &'static Shape) -> Option<&'static StructType> {
    if shape.inner.is_some() {
        return None;
    }
    match shape.def {
        Def::Scalar
        | Def::List(_)
        | Def::Set(_)
        | Def::Map(_)
        | Def::Option(_)
        | Def::Pointer(_) => return None,
        _ => {}
    }
    match &shape.ty {
        Type::User(UserType::Struct(struct_def)) => Some(struct_def),
        _ => None,
    }
}

fn field_shape(shape: &'static Shape, index: usize) -> Result<&'static Shape> {
    let Type::User(UserType::Struct(struct_def)) = &shape.ty else {
        return Err(AliasErrorKind::NotAStruct(shape).into());
    };
    struct_def
        .fields
        .get(index)
        .map(|field| field.shape)
        .ok_or_else(|| {
            AliasErrorKind::UnsupportedShape(format!("{shape} has no field #{index}")).into()
        })
}

struct YamlDeserializer {
    events: Vec<SpannedEvent>,
    pos: usize,
    mode: Mode,
}

impl YamlDeserializer {
    fn new(input: &str, mode: Mode) -> Result<Self> {
        let mut collector = EventCollector::new();
        Parser::new_from_str(input)
            .load(&mut collector, true)
            .map_err(|e| AliasErrorKind::Parse(format!("{e}")))?;

        if let Some(err) = collector.error {
            return Err(err);
        }

        log::trace!("YAML parsed into {} events", collector.events.len());
        Ok(Self {
            events: collector.events,
            pos: 0,
            mode,
        })
    }

    fn peek(&self) -> Option<&SpannedEvent> {
        self.events.get(self.pos)
    }

    fn current_location(&self) -> Option<Location> {
        self.peek()
            .or_else(|| self.events.last())
            .map(|event| event.location)
    }

    fn error(&self, kind: AliasErrorKind) -> AliasError {
        let err = AliasError::from(kind);
        match self.current_location() {
            Some(location) => err.at(location),
            None => err,
        }
    }

    fn next_or_eof(&mut self, expected: &'static str) -> Result<SpannedEvent> {
        match self.events.get(self.pos) {
            Some(event) => {
                let event = event.clone();
                self.pos += 1;
                Ok(event)
            }
            None => Err(self.error(AliasErrorKind::UnexpectedEof { expected })),
        }
    }

    fn next_is_null(&self) -> bool {
        matches!(
            self.peek().map(|e| &e.event),
            Some(OwnedEvent::Scalar { value, plain: true }) if scalar::is_null(value)
        )
    }

    fn expect_start(&mut self, expected: &'static str) -> Result<()> {
        let event = self.next_or_eof(expected)?;
        match (&event.event, expected) {
            (OwnedEvent::MappingStart, "mapping") | (OwnedEvent::SequenceStart, "sequence") => {
                Ok(())
            }
            (other, _) => Err(AliasError::from(AliasErrorKind::UnexpectedEvent {
                got: describe(other),
                expected,
            })
            .at(event.location)),
        }
    }

    /// Consumes one complete node without decoding it.
    fn skip_value(&mut self) -> Result<()> {
        let mut depth = 0usize;
        loop {
            let event = self.next_or_eof("value")?;
            match event.event {
                OwnedEvent::SequenceStart | OwnedEvent::MappingStart => depth += 1,
                OwnedEvent::SequenceEnd | OwnedEvent::MappingEnd if depth > 0 => depth -= 1,
                OwnedEvent::Scalar { .. } => {}
                other => {
                    return Err(AliasError::from(AliasErrorKind::UnexpectedEvent {
                        got: describe(&other),
                        expected: "value",
                    })
                    .at(event.location));
                }
            }
            if depth == 0 {
                return Ok(());
            }
        }
    }

    fn next_is_mapping(&self) -> bool {
        matches!(
            self.peek().map(|e| &e.event),
            Some(OwnedEvent::MappingStart)
        )
    }

    /// Moves to the root node. Returns false if the document has none, or
    /// if the root is null.
    fn enter_document(&mut self) -> bool {
        while let Some(OwnedEvent::StreamStart | OwnedEvent::DocumentStart) =
            self.peek().map(|e| &e.event)
        {
            self.pos += 1;
        }

        if matches!(
            self.peek().map(|e| &e.event),
            None | Some(OwnedEvent::StreamEnd | OwnedEvent::DocumentEnd)
        ) {
            log::debug!("Empty document, nothing to decode");
            return false;
        }
        if self.next_is_null() {
            log::debug!("Null document, nothing to decode");
            self.pos += 1;
            return false;
        }
        true
    }

    /// Decodes every selected value into scratch storage, so that input
    /// errors surface before the destination is touched.
    fn check_shadow(&mut self, shadow: &ShadowType) -> Result<()> {
        log::trace!("Entering `check_shadow` method");

        if !self.enter_document() {
            return Ok(());
        }
        let entries = self.shadow_entries(shadow)?;
        let resume = self.pos;
        for (index, pos) in entries {
            self.pos = pos;
            if self.next_is_null() {
                continue;
            }
            let Some(shape) = shadow.slot_shape(index) else {
                continue;
            };
            self.check_value(shape)?;
        }
        self.pos = resume;
        Ok(())
    }

    /// Checks the value at the cursor the way [`Self::merge_field`] will
    /// decode it.
    fn check_value(&mut self, shape: &'static Shape) -> Result<()> {
        if let Some(struct_def) = mergeable_struct(shape) {
            if self.next_is_mapping() {
                let entries = self.struct_entries(shape, struct_def)?;
                let resume = self.pos;
                for (index, pos) in entries {
                    self.pos = pos;
                    self.check_value(struct_def.fields[index].shape)?;
                }
                self.pos = resume;
                return Ok(());
            }
        }

        let mut scratch = Partial::alloc_shape(shape)?;
        self.deserialize_value(&mut scratch)
    }

    fn merge_shadow<'facet>(
        &mut self,
        partial: &mut Partial<'facet>,
        original: &mut Partial<'facet>,
        shadow: &ShadowType,
    ) -> Result<()> {
        log::trace!("Entering `merge_shadow` method");

        if self.enter_document() {
            let entries = self.shadow_entries(shadow)?;
            let resume = self.pos;
            for (index, pos) in entries {
                self.pos = pos;
                if self.next_is_null() {
                    log::trace!("Null leaves field #{index} as it was");
                    continue;
                }
                self.merge_field(partial, original, index)?;
            }
            self.pos = resume;
        }
        fill_untouched(partial, original, shadow.slot_count())?;

        log::trace!("Exiting `merge_shadow` method");
        Ok(())
    }

    /// Decodes the value at the cursor into field `index` of `partial`.
    ///
    /// A mapping given for a plain struct field is merged into that field's
    /// value in `previous`: fields the mapping does not mention keep their
    /// earlier values, recursively.
    fn merge_field<'facet>(
        &mut self,
        partial: &mut Partial<'facet>,
        previous: &mut Partial<'facet>,
        index: usize,
    ) -> Result<()> {
        let shape = field_shape(partial.shape(), index)?;
        let Some(struct_def) = mergeable_struct(shape).filter(|_| self.next_is_mapping()) else {
            partial.begin_nth_field(index)?;
            self.deserialize_value(partial)?;
            partial.end()?;
            return Ok(());
        };

        log::trace!("Merging into existing {shape} at {}", partial.path());
        partial.steal_nth_field(previous, index)?;
        partial.begin_nth_field(index)?;

        // Hollow out the field so each key decides again what it holds
        let field_count = struct_def.fields.len();
        let mut earlier = Partial::alloc_shape(shape)?;
        for j in 0..field_count {
            earlier.steal_nth_field(partial, j)?;
        }

        let entries = self.struct_entries(shape, struct_def)?;
        let resume = self.pos;
        for (j, pos) in entries {
            self.pos = pos;
            self.merge_field(partial, &mut earlier, j)?;
        }
        self.pos = resume;

        fill_untouched(partial, &mut earlier, field_count)?;
        partial.end()?;
        Ok(())
    }

    fn shadow_entries(&mut self, shadow: &ShadowType) -> Result<Vec<(usize, usize)>> {
        let deny_unknown =
            self.mode == Mode::Strict || shadow.target().has_deny_unknown_fields_attr();
        self.collect_entries(
            shadow.slot_count(),
            deny_unknown,
            &|key| shadow.lookup(key).map(|field| field.slot.index()),
            &|| shadow.keys().map(str::to_string).collect(),
        )
    }

    /// Nested structs match keys against field names only.
    fn struct_entries(
        &mut self,
        shape: &'static Shape,
        struct_def: &'static StructType,
    ) -> Result<Vec<(usize, usize)>> {
        let fields = struct_def.fields;
        let deny_unknown = self.mode == Mode::Strict || shape.has_deny_unknown_fields_attr();
        self.collect_entries(
            fields.len(),
            deny_unknown,
            &|key| {
                fields
                    .iter()
                    .position(|field| field.name == key && !is_unexported(field))
            },
            &|| {
                fields
                    .iter()
                    .filter(|field| !is_unexported(field))
                    .map(|field| field.name.to_string())
                    .collect()
            },
        )
    }

    /// Reads one mapping, resolving each key to a field index.
    ///
    /// Returns `(field index, value position)` pairs. When several keys resolve
    /// to the same field, the last one in the document is kept.
    fn collect_entries(
        &mut self,
        field_count: usize,
        deny_unknown: bool,
        resolve: &dyn Fn(&str) -> Option<usize>,
        expected: &dyn Fn() -> Vec<String>,
    ) -> Result<Vec<(usize, usize)>> {
        let winners = self.read_mapping(field_count, deny_unknown, resolve, expected)?;
        Ok(winners
            .into_iter()
            .enumerate()
            .filter_map(|(index, pos)| pos.map(|pos| (index, pos)))
            .collect())
    }

    /// Returns, per field, the position of the value that wins.
    ///
    /// Keys written in the mapping itself win over keys merged in with `<<`.
    fn read_mapping(
        &mut self,
        field_count: usize,
        deny_unknown: bool,
        resolve: &dyn Fn(&str) -> Option<usize>,
        expected: &dyn Fn() -> Vec<String>,
    ) -> Result<Vec<Option<usize>>> {
        self.expect_start("mapping")?;

        let mut winners: Vec<Option<usize>> = vec![None; field_count];
        let mut merged: Vec<Option<usize>> = vec![None; field_count];
        let mut seen = HashSet::new();

        loop {
            let Some(event) = self.peek() else {
                return Err(self.error(AliasErrorKind::UnexpectedEof {
                    expected: "mapping key or end",
                }));
            };
            let location = event.location;
            let (key, plain) = match &event.event {
                OwnedEvent::MappingEnd => {
                    self.pos += 1;
                    break;
                }
                OwnedEvent::Scalar { value, plain } => (value.clone(), *plain),
                other => {
                    return Err(AliasError::from(AliasErrorKind::UnexpectedEvent {
                        got: describe(other),
                        expected: "string key",
                    })
                    .at(location));
                }
            };
            self.pos += 1;

            if self.mode == Mode::Strict && !seen.insert(key.clone()) {
                return Err(AliasError::from(AliasErrorKind::DuplicateKey(key)).at(location));
            }

            if plain && key == MERGE_KEY {
                let sources = self.merge_sources()?;
                let after = self.pos;
                for source in sources {
                    self.pos = source;
                    let found = self.read_mapping(field_count, deny_unknown, resolve, expected)?;
                    for (slot, pos) in merged.iter_mut().zip(found) {
                        if slot.is_none() {
                            *slot = pos;
                        }
                    }
                }
                self.pos = after;
                continue;
            }

            match resolve(&key) {
                Some(index) => {
                    log::trace!("Key '{key}' selects field #{index}");
                    winners[index] = Some(self.pos);
                }
                None if deny_unknown => {
                    return Err(AliasError::from(AliasErrorKind::UnknownField {
                        key,
                        expected: expected(),
                    })
                    .at(location));
                }
                None => log::debug!("Ignoring unknown key '{key}'"),
            }

            self.skip_value()?;
        }

        Ok(winners
            .into_iter()
            .zip(merged)
            .map(|(explicit, merged)| explicit.or(merged))
            .collect())
    }

    /// Reads the value of a `<<` key: one mapping, or a sequence of them.
    ///
    /// Returns the start position of each mapping, highest precedence first,
    /// and leaves the cursor after the value.
    fn merge_sources(&mut self) -> Result<Vec<usize>> {
        let start = self.pos;
        match self.peek().map(|e| &e.event) {
            Some(OwnedEvent::MappingStart) => {
                self.skip_value()?;
                return Ok(vec![start]);
            }
            Some(OwnedEvent::SequenceStart) => self.pos += 1,
            _ => return Err(self.unexpected("mapping or sequence of mappings to merge")),
        }

        let mut sources = Vec::new();
        while !self.at_sequence_end()? {
            if !self.next_is_mapping() {
                return Err(self.unexpected("mapping to merge"));
            }
            sources.push(self.pos);
            self.skip_value()?;
        }
        Ok(sources)
    }

    fn unexpected(&self, expected: &'static str) -> AliasError {
        match self.peek() {
            Some(event) => AliasError::from(AliasErrorKind::UnexpectedEvent {
                got: describe(&event.event),
                expected,
            })
            .at(event.location),
            None => self.error(AliasErrorKind::UnexpectedEof { expected }),
        }
    }

    fn apply_entries<'facet>(
        &mut self,
        partial: &mut Partial<'facet>,
        entries: &[(usize, usize)],
    ) -> Result<()> {
        let resume = self.pos;
        for &(index, pos) in entries {
            self.pos = pos;
            partial.begin_nth_field(index)?;
            self.deserialize_value(partial)?;
            partial.end()?;
        }
        self.pos = resume;
        Ok(())
    }

    fn deserialize_value<'facet>(&mut self, partial: &mut Partial<'facet>) -> Result<()> {
        let location = self.current_location();
        self.deserialize_value_inner(partial)
            .map_err(|err| match location {
                Some(location) => err.at(location),
                None => err,
            })
    }

    fn deserialize_value_inner<'facet>(&mut self, partial: &mut Partial<'facet>) -> Result<()> {
        let shape = partial.shape();
        log::trace!(
            "Entering `deserialize_value` method at {} ({})",
            partial.path(),
            shape
        );

        // Handle Option<T> - either set to None (for null) or unwrap and recurse
        if let Def::Option(_) = shape.def {
            if self.next_is_null() {
                self.pos += 1;
                partial.set_default()?;
            } else {
                partial.begin_some()?;
                self.deserialize_value(partial)?;
                partial.end()?;
            }
            return Ok(());
        }

        if self.next_is_null() {
            log::trace!("Null for non-optional {shape}, using its default");
            self.pos += 1;
            partial.set_default()?;
            return Ok(());
        }

        if let Def::Pointer(_) = shape.def {
            partial.begin_smart_ptr()?;
            self.deserialize_value(partial)?;
            partial.end()?;
            return Ok(());
        }

        // Transparent wrappers decode as their inner type
        if shape.inner.is_some() {
            partial.begin_inner()?;
            self.deserialize_value(partial)?;
            partial.end()?;
            return Ok(());
        }

        match shape.def {
            Def::Scalar => return self.deserialize_scalar(partial),
            Def::List(_) => return self.deserialize_list(partial),
            Def::Set(_) => return self.deserialize_set(partial),
            Def::Map(_) => return self.deserialize_map(partial),
            _ => {}
        }

        match &shape.ty {
            Type::User(UserType::Struct(struct_def)) => self.deserialize_struct(partial, struct_def),
            Type::User(UserType::Enum(enum_def)) => self.deserialize_enum(partial, enum_def),
            _ => Err(AliasErrorKind::UnsupportedShape(format!("{shape}")).into()),
        }
    }

    fn next_scalar(&mut self) -> Result<(String, bool)> {
        let event = self.next_or_eof("scalar value")?;
        match event.event {
            OwnedEvent::Scalar { value, plain } => Ok((value, plain)),
            other => Err(AliasError::from(AliasErrorKind::UnexpectedEvent {
                got: describe(&other),
                expected: "scalar value",
            })
            .at(event.location)),
        }
    }

    fn deserialize_scalar<'facet>(&mut self, partial: &mut Partial<'facet>) -> Result<()> {
        let (value, plain) = self.next_scalar()?;
        let shape = partial.shape();

        match shape.type_identifier {
            "String" => {
                partial.set(value)?;
                return Ok(());
            }
            "char" => {
                let mut chars = value.chars();
                let (Some(c), None) = (chars.next(), chars.next()) else {
                    return Err(AliasErrorKind::InvalidValue(format!(
                        "'{value}' is not a single character"
                    ))
                    .into());
                };
                partial.set(c)?;
                return Ok(());
            }
            _ => {}
        }

        let typed = shape.type_identifier == "bool"
            || matches!(shape.ty, Type::Primitive(PrimitiveType::Numeric(_)));
        if typed && !plain {
            return Err(AliasErrorKind::InvalidValue(format!(
                "expected {}, found quoted string '{value}'",
                shape.type_identifier
            ))
            .into());
        }

        if shape.type_identifier == "bool" {
            let b = scalar::parse_bool(&value).ok_or_else(|| {
                AliasErrorKind::InvalidValue(format!("cannot parse '{value}' as bool"))
            })?;
            partial.set(b)?;
            return Ok(());
        }

        if let Type::Primitive(PrimitiveType::Numeric(numeric)) = &shape.ty {
            return set_number(partial, shape, numeric, &value);
        }

        // Anything else that knows how to parse itself from text
        partial.parse_from_str(&value).map_err(|_| {
            AliasErrorKind::InvalidValue(format!("cannot parse '{value}' as {shape}"))
        })?;
        Ok(())
    }

    fn deserialize_list<'facet>(&mut self, partial: &mut Partial<'facet>) -> Result<()> {
        self.expect_start("sequence")?;
        partial.begin_list()?;
        while !self.at_sequence_end()? {
            partial.begin_list_item()?;
            self.deserialize_value(partial)?;
            partial.end()?;
        }
        Ok(())
    }

    fn deserialize_set<'facet>(&mut self, partial: &mut Partial<'facet>) -> Result<()> {
        self.expect_start("sequence")?;
        partial.begin_set()?;
        while !self.at_sequence_end()? {
            partial.begin_set_item()?;
            self.deserialize_value(partial)?;
            partial.end()?;
        }
        Ok(())
    }

    /// Consumes the closing event if the current sequence is finished.
    fn at_sequence_end(&mut self) -> Result<bool> {
        match self.peek().map(|e| &e.event) {
            Some(OwnedEvent::SequenceEnd) => {
                self.pos += 1;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(self.error(AliasErrorKind::UnexpectedEof {
                expected: "sequence item or end",
            })),
        }
    }

    /// Maps are always built fresh from the mapping's entries.
    fn deserialize_map<'facet>(&mut self, partial: &mut Partial<'facet>) -> Result<()> {
        let entries = self.map_entries()?;
        let resume = self.pos;

        partial.begin_map()?;
        for (key, pos) in entries {
            partial.begin_key()?;
            if partial.shape().type_identifier == "String" {
                partial.set(key)?;
            } else {
                let key_shape = partial.shape();
                partial.parse_from_str(&key).map_err(|_| {
                    AliasErrorKind::InvalidValue(format!("cannot parse key '{key}' as {key_shape}"))
                })?;
            }
            partial.end()?;

            self.pos = pos;
            partial.begin_value()?;
            self.deserialize_value(partial)?;
            partial.end()?;
        }

        self.pos = resume;
        Ok(())
    }

    /// Reads a mapping into `(key, value position)` pairs in insertion order.
    ///
    /// Entries merged with `<<` come first, so keys written in the mapping
    /// itself overwrite them when inserted.
    fn map_entries(&mut self) -> Result<Vec<(String, usize)>> {
        self.expect_start("mapping")?;

        let mut explicit = Vec::new();
        let mut merged = Vec::new();
        let mut seen = HashSet::new();
        loop {
            match self.peek().map(|e| &e.event) {
                Some(OwnedEvent::MappingEnd) => {
                    self.pos += 1;
                    break;
                }
                Some(_) => {}
                None => {
                    return Err(self.error(AliasErrorKind::UnexpectedEof {
                        expected: "mapping key or end",
                    }));
                }
            }

            let location = self.current_location();
            let (key, plain) = self.next_scalar()?;
            if self.mode == Mode::Strict && !seen.insert(key.clone()) {
                let err = AliasError::from(AliasErrorKind::DuplicateKey(key));
                return Err(match location {
                    Some(location) => err.at(location),
                    None => err,
                });
            }

            if plain && key == MERGE_KEY {
                let sources = self.merge_sources()?;
                let after = self.pos;
                // Earlier sources take precedence, so they are inserted last
                for source in sources.into_iter().rev() {
                    self.pos = source;
                    merged.extend(self.map_entries()?);
                }
                self.pos = after;
                continue;
            }

            explicit.push((key, self.pos));
            self.skip_value()?;
        }

        merged.extend(explicit);
        Ok(merged)
    }

    /// Nested structs match keys against field names only.
    fn deserialize_struct<'facet>(
        &mut self,
        partial: &mut Partial<'facet>,
        struct_def: &'static StructType,
    ) -> Result<()> {
        let entries = self.struct_entries(partial.shape(), struct_def)?;
        self.apply_entries(partial, &entries)?;

        for (index, field) in struct_def.fields.iter().enumerate() {
            if !partial.is_field_set(index)? {
                log::trace!("Setting default for unset field: {}", field.name);
                partial
                    .set_nth_field_to_default(index)
                    .map_err(|_| AliasErrorKind::MissingField(field.name))?;
            }
        }

        Ok(())
    }

    /// Unit variants, selected by name.
    fn deserialize_enum<'facet>(
        &mut self,
        partial: &mut Partial<'facet>,
        enum_def: &'static EnumType,
    ) -> Result<()> {
        let (name, _) = self.next_scalar()?;
        let Some(variant) = enum_def.variants.iter().find(|v| v.name == name) else {
            return Err(AliasErrorKind::UnknownVariant(name).into());
        };
        if !variant.data.fields.is_empty() {
            return Err(AliasErrorKind::UnsupportedShape(format!(
                "variant '{name}' of {} carries data",
                partial.shape()
            ))
            .into());
        }
        partial.select_variant_named(variant.name)?;
        Ok(())
    }
}

fn set_number<'facet>(
    partial: &mut Partial<'facet>,
    shape: &'static Shape,
    numeric: &NumericType,
    value: &str,
) -> Result<()> {
    let size = match shape.layout {
        ShapeLayout::Sized(layout) => layout.size(),
        ShapeLayout::Unsized => {
            return Err(AliasErrorKind::InvalidValue(
                "cannot assign a number to an unsized type".into(),
            )
            .into());
        }
    };

    if let NumericType::Float = numeric {
        let float = scalar::parse_float(value).ok_or_else(|| {
            AliasErrorKind::InvalidValue(format!("cannot parse '{value}' as {shape}"))
        })?;
        match size {
            4 => partial.set(float as f32)?,
            8 => partial.set(float)?,
            _ => {
                return Err(
                    AliasErrorKind::UnsupportedShape(format!("float of size {size}")).into(),
                );
            }
        };
        return Ok(());
    }

    let integer = scalar::parse_int(value).ok_or_else(|| {
        AliasErrorKind::InvalidValue(format!("cannot parse '{value}' as {shape}"))
    })?;
    let out_of_range = || AliasErrorKind::NumberOutOfRange {
        value: value.to_string(),
        target_type: shape.type_identifier,
    };

    // usize/isize share a layout with a fixed-width integer but not its shape
    match shape.type_identifier {
        "usize" => {
            partial.set(usize::try_from(integer).map_err(|_| out_of_range())?)?;
            return Ok(());
        }
        "isize" => {
            partial.set(isize::try_from(integer).map_err(|_| out_of_range())?)?;
            return Ok(());
        }
        _ => {}
    }

    match (numeric, size) {
        // Unsigned integers
        (NumericType::Integer { signed: false }, 1) => {
            partial.set(u8::try_from(integer).map_err(|_| out_of_range())?)?
        }
        (NumericType::Integer { signed: false }, 2) => {
            partial.set(u16::try_from(integer).map_err(|_| out_of_range())?)?
        }
        (NumericType::Integer { signed: false }, 4) => {
            partial.set(u32::try_from(integer).map_err(|_| out_of_range())?)?
        }
        (NumericType::Integer { signed: false }, 8) => {
            partial.set(u64::try_from(integer).map_err(|_| out_of_range())?)?
        }
        (NumericType::Integer { signed: false }, 16) => {
            partial.set(u128::try_from(integer).map_err(|_| out_of_range())?)?
        }
        // Signed integers
        (NumericType::Integer { signed: true }, 1) => {
            partial.set(i8::try_from(integer).map_err(|_| out_of_range())?)?
        }
        (NumericType::Integer { signed: true }, 2) => {
            partial.set(i16::try_from(integer).map_err(|_| out_of_range())?)?
        }
        (NumericType::Integer { signed: true }, 4) => {
            partial.set(i32::try_from(integer).map_err(|_| out_of_range())?)?
        }
        (NumericType::Integer { signed: true }, 8) => {
            partial.set(i64::try_from(integer).map_err(|_| out_of_range())?)?
        }
        (NumericType::Integer { signed: true }, 16) => partial.set(integer)?,
        _ => {
            return Err(AliasErrorKind::UnsupportedShape(format!(
                "unhandled numeric type: {numeric:?} with size {size}"
            ))
            .into());
        }
    };

    Ok(())
}

fn describe(event: &OwnedEvent) -> String {
    match event {
        OwnedEvent::Scalar { value, .. } => format!("scalar '{value}'"),
        OwnedEvent::SequenceStart => "sequence".to_string(),
        OwnedEvent::MappingStart => "mapping".to_string(),
        other => format!("{other:?}"),
    }
}
