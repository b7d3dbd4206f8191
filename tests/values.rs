#![allow(missing_docs)]

use std::collections::{HashMap, HashSet};

use facet::Facet;
use facet_yaml_alias::{AliasErrorKind, decode, from_str};
use indoc::indoc;

#[derive(Facet, Debug, Default, PartialEq)]
#[repr(u8)]
enum Level {
    #[default]
    Low,
    High,
}

#[derive(Facet, Debug, Default, PartialEq)]
struct Settings {
    #[facet(yaml_aliases = "display-name")]
    name: String,
    enabled: bool,
    ratio: f64,
    limit: Option<u32>,
    hosts: Vec<String>,
    weights: HashMap<String, u32>,
    tags: HashSet<String>,
    level: Level,
    mask: u8,
}

#[test]
fn decodes_every_supported_kind() {
    let yaml = indoc! {"
        display-name: edge
        enabled: yes
        ratio: 0.25
        limit: 10
        hosts:
          - a.example
          - b.example
        weights:
          a: 1
          b: 2
        tags: [x, y]
        level: High
        mask: 0x0f
    "};

    let settings: Settings = from_str(yaml).unwrap();

    assert_eq!(settings.name, "edge");
    assert!(settings.enabled);
    assert_eq!(settings.ratio, 0.25);
    assert_eq!(settings.limit, Some(10));
    assert_eq!(settings.hosts, ["a.example", "b.example"]);
    assert_eq!(settings.weights.get("b"), Some(&2));
    assert_eq!(settings.tags.len(), 2);
    assert!(settings.tags.contains("y"));
    assert_eq!(settings.level, Level::High);
    assert_eq!(settings.mask, 15);
}

#[test]
fn null_leaves_top_level_field_alone() {
    let mut settings = Settings {
        name: "edge".into(),
        limit: Some(3),
        ..Default::default()
    };
    let yaml = indoc! {"
        limit: ~
        display-name: null
        mask:
    "};
    decode(yaml, &mut settings).unwrap();
    assert_eq!(settings.limit, Some(3));
    assert_eq!(settings.name, "edge");
}

#[test]
fn null_clears_nested_field() {
    #[derive(Facet, Debug, Default, PartialEq)]
    struct Outer {
        inner: Inner,
    }

    #[derive(Facet, Debug, Default, PartialEq)]
    struct Inner {
        limit: Option<u32>,
        label: String,
    }

    let mut outer = Outer {
        inner: Inner {
            limit: Some(3),
            label: "kept".into(),
        },
    };
    decode("inner:\n  limit: ~", &mut outer).unwrap();
    assert_eq!(outer.inner.limit, None);
    assert_eq!(outer.inner.label, "kept");
}

#[test]
fn yaml_1_1_scalar_forms() {
    let yaml = indoc! {"
        enabled: y
        mask: 017
        limit: 1_000
    "};

    let settings: Settings = from_str(yaml).unwrap();
    assert!(settings.enabled);
    assert_eq!(settings.mask, 15);
    assert_eq!(settings.limit, Some(1000));
}

#[test]
fn integer_with_second_sign_is_invalid() {
    for value in ["-0x-5", "0x+5", "-0x-80000000000000000000000000000000"] {
        let mut settings = Settings::default();
        let err = decode(&format!("mask: {value}"), &mut settings).unwrap_err();
        assert!(
            matches!(err.kind(), AliasErrorKind::InvalidValue(_)),
            "{value}: {err}"
        );
    }
}

#[test]
fn anchors_are_expanded() {
    let yaml = indoc! {"
        name: &shared edge
        hosts: &list [one, two]
        weights:
          one: 1
        tags: *list
        display-name: *shared
    "};

    let settings: Settings = from_str(yaml).unwrap();
    assert_eq!(settings.name, "edge");
    assert_eq!(settings.hosts, ["one", "two"]);
    assert!(settings.tags.contains("two"));
}

#[test]
fn excessive_aliasing_is_rejected() {
    let yaml = indoc! {"
        a: &a [x, x, x, x, x, x, x, x, x, x]
        b: &b [*a, *a, *a, *a, *a, *a, *a, *a, *a, *a]
        c: &c [*b, *b, *b, *b, *b, *b, *b, *b, *b, *b]
        d: &d [*c, *c, *c, *c, *c, *c, *c, *c, *c, *c]
        e: &e [*d, *d, *d, *d, *d, *d, *d, *d, *d, *d]
        f: &f [*e, *e, *e, *e, *e, *e, *e, *e, *e, *e]
        g: &g [*f, *f, *f, *f, *f, *f, *f, *f, *f, *f]
        h: &h [*g, *g, *g, *g, *g, *g, *g, *g, *g, *g]
        i: &i [*h, *h, *h, *h, *h, *h, *h, *h, *h, *h]
        name: edge
    "};

    let mut settings = Settings::default();
    let err = decode(yaml, &mut settings).unwrap_err();
    assert!(
        matches!(err.kind(), AliasErrorKind::ExcessiveAliasing { .. }),
        "unexpected error: {err}"
    );
    assert_eq!(err.location().map(|l| l.line), Some(4));
    assert_eq!(settings, Settings::default());
}

#[test]
fn merge_key_fills_map_entries() {
    let yaml = indoc! {"
        hosts: []
        weights:
          <<: {a: 1, b: 2}
          b: 3
    "};

    let settings: Settings = from_str(yaml).unwrap();
    assert_eq!(settings.weights.len(), 2);
    assert_eq!(settings.weights.get("a"), Some(&1));
    assert_eq!(settings.weights.get("b"), Some(&3));
}

#[test]
fn unknown_anchor_is_an_error() {
    let mut settings = Settings::default();
    let err = decode("name: *nowhere", &mut settings).unwrap_err();
    assert!(
        matches!(
            err.kind(),
            AliasErrorKind::UnknownAnchor(_) | AliasErrorKind::Parse(_)
        ),
        "unexpected error: {err}"
    );
}

#[test]
fn out_of_range_restores_destination() {
    let mut settings = Settings {
        name: "keep".into(),
        mask: 7,
        ..Default::default()
    };

    let err = decode("name: changed\nmask: 300", &mut settings).unwrap_err();

    assert!(matches!(
        err.kind(),
        AliasErrorKind::NumberOutOfRange { value, target_type: "u8" } if value == "300"
    ));
    assert_eq!(err.location().map(|l| l.line), Some(2));
    assert_eq!(settings.name, "keep");
    assert_eq!(settings.mask, 7);
}

#[test]
fn quoted_number_is_not_an_integer() {
    let mut settings = Settings::default();
    let err = decode("mask: \"12\"", &mut settings).unwrap_err();
    assert!(matches!(err.kind(), AliasErrorKind::InvalidValue(_)));
}

#[test]
fn quoted_text_keeps_its_spelling() {
    let settings: Settings = from_str("name: 'yes'").unwrap();
    assert_eq!(settings.name, "yes");
}

#[test]
fn malformed_yaml_is_a_parse_error() {
    let mut settings = Settings::default();
    let err = decode("hosts: [one, two", &mut settings).unwrap_err();
    assert!(matches!(err.kind(), AliasErrorKind::Parse(_)));
    assert_eq!(settings, Settings::default());
}

#[test]
fn unknown_enum_variant_is_an_error() {
    let mut settings = Settings::default();
    let err = decode("level: Medium", &mut settings).unwrap_err();
    assert!(matches!(err.kind(), AliasErrorKind::UnknownVariant(v) if v == "Medium"));
    assert_eq!(settings.level, Level::Low);
}

#[test]
fn empty_document_changes_nothing() {
    let mut settings = Settings {
        name: "kept".into(),
        ..Default::default()
    };
    decode("", &mut settings).unwrap();
    decode("~", &mut settings).unwrap();
    assert_eq!(settings.name, "kept");
}

#[test]
fn top_level_sequence_is_rejected() {
    let mut settings = Settings::default();
    let err = decode("- a\n- b", &mut settings).unwrap_err();
    assert!(matches!(
        err.kind(),
        AliasErrorKind::UnexpectedEvent { expected: "mapping", .. }
    ));
}

#[test]
fn nested_struct_merges_into_existing_value() {
    #[derive(Facet, Debug, Default, PartialEq)]
    struct Outer {
        inner: Inner,
    }

    #[derive(Facet, Debug, Default, PartialEq)]
    struct Inner {
        a: u32,
        b: String,
        deep: Deep,
    }

    #[derive(Facet, Debug, Default, PartialEq)]
    struct Deep {
        x: u8,
        y: u8,
    }

    let outer: Outer = from_str("inner:\n  a: 1").unwrap();
    assert_eq!(outer.inner, Inner { a: 1, ..Default::default() });

    let mut outer = Outer {
        inner: Inner {
            a: 1,
            b: "kept".into(),
            deep: Deep { x: 1, y: 2 },
        },
    };
    let yaml = indoc! {"
        inner:
          a: 5
          deep:
            y: 9
    "};
    decode(yaml, &mut outer).unwrap();
    assert_eq!(
        outer.inner,
        Inner {
            a: 5,
            b: "kept".into(),
            deep: Deep { x: 1, y: 9 },
        }
    );
}

#[test]
fn nested_struct_without_default_keeps_existing_fields() {
    #[derive(Facet, Debug)]
    struct Quota {
        limits: Limits,
    }

    impl Default for Quota {
        fn default() -> Self {
            Quota {
                limits: Limits { soft: 1, hard: 2 },
            }
        }
    }

    #[derive(Facet, Debug, PartialEq)]
    struct Limits {
        soft: u32,
        hard: u32,
    }

    let mut quota = Quota {
        limits: Limits { soft: 10, hard: 20 },
    };
    decode("limits:\n  soft: 15", &mut quota).unwrap();
    assert_eq!(quota.limits, Limits { soft: 15, hard: 20 });
}

#[test]
fn named_map_is_replaced() {
    let mut settings = Settings::default();
    settings.weights.insert("old".into(), 1);

    decode("weights:\n  new: 2", &mut settings).unwrap();
    assert_eq!(settings.weights.len(), 1);
    assert_eq!(settings.weights.get("new"), Some(&2));

    decode("hosts: [a]", &mut settings).unwrap();
    assert_eq!(settings.weights.get("new"), Some(&2));
}

#[test]
fn nested_error_restores_destination() {
    #[derive(Facet, Debug, Default, PartialEq)]
    struct Outer {
        label: String,
        inner: Inner,
    }

    #[derive(Facet, Debug, Default, PartialEq)]
    struct Inner {
        a: u32,
        b: u8,
    }

    let before = Outer {
        label: "before".into(),
        inner: Inner { a: 1, b: 2 },
    };
    let mut outer = Outer {
        label: "before".into(),
        inner: Inner { a: 1, b: 2 },
    };
    let yaml = indoc! {"
        label: after
        inner:
          a: 7
          b: 900
    "};

    let err = decode(yaml, &mut outer).unwrap_err();
    assert!(matches!(err.kind(), AliasErrorKind::NumberOutOfRange { .. }));
    assert_eq!(err.location().map(|l| l.line), Some(4));
    assert_eq!(outer, before);
}

#[test]
fn nested_field_without_default_is_missing() {
    #[derive(Facet, Debug, Default)]
    struct Outer {
        inner: Option<Inner>,
    }

    #[derive(Facet, Debug)]
    struct Inner {
        required: Required,
    }

    #[derive(Facet, Debug)]
    struct Required {
        value: u32,
    }

    let mut outer = Outer::default();
    let err = decode("inner:\n  other: 1", &mut outer).unwrap_err();
    assert!(matches!(err.kind(), AliasErrorKind::MissingField("required")));
    assert!(outer.inner.is_none());
}

#[test]
fn error_message_includes_location() {
    let mut settings = Settings::default();
    let err = decode("enabled: maybe", &mut settings).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("maybe"), "{message}");
    assert!(message.contains("line 1"), "{message}");
}
