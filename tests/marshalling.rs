//! Integration tests for value marshalling
//!
//! Templates are encoded through a started session against the simulated
//! engine, so every allocation goes through the target's own `malloc`.

use cprobe::target::catalog::TypeCatalog;
use cprobe::testing::SimInferior;
use cprobe::{EncodingError, ProbeError, Session, SessionConfig, ValueTemplate};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn catalog() -> TypeCatalog {
    TypeCatalog::lp64()
        .with_struct("pair", &[("a", "int"), ("b", "char")])
        .unwrap()
        .with_packed_struct("packed_pair", &[("a", "int"), ("b", "char")])
        .unwrap()
        .with_union("word", &[("c", "char"), ("l", "long")])
        .unwrap()
        .with_struct("node", &[("value", "int"), ("next", "struct node *")])
        .unwrap()
        .with_struct("message", &[("len", "int"), ("data", "char[]")])
        .unwrap()
        .with_enum("color", &[("RED", 0), ("GREEN", 1), ("BLUE", 4)])
        .unwrap()
}

fn session() -> Session<SimInferior> {
    init_logging();
    let engine = SimInferior::new(catalog())
        .with_libc_functions()
        .define(
            "sum",
            "int",
            &[("xs", "const int *"), ("n", "int")],
            |ctx, args| {
                let base = args[0].address()?;
                let n = args[1].as_i64()?;
                let mut total = 0;
                for i in 0..n {
                    total += ctx.read_value("int", base + 4 * i as u64)?.as_i64()?;
                }
                ctx.return_int(i128::from(total))
            },
        )
        .unwrap()
        .define(
            "list_length",
            "int",
            &[("head", "struct node *")],
            |ctx, args| {
                let mut length = 0;
                let mut current = args[0].address()?;
                while current != 0 && length < 100 {
                    length += 1;
                    current = ctx.read_value("struct node *", current + 8)?.address()?;
                }
                ctx.return_int(length)
            },
        )
        .unwrap();
    let config = SessionConfig {
        crash_log_path: None,
        ..SessionConfig::for_program("./student")
    };
    let mut session = Session::new(engine, config);
    session.start().unwrap();
    session
}

#[test]
fn test_struct_padding_and_packing() {
    let mut session = session();
    let padded = session
        .value("struct pair", ValueTemplate::fields([("a", 1), ("b", 2)]))
        .unwrap();
    assert_eq!(padded.len(), 8);
    assert_eq!(&padded.bytes()[4..], &[2, 0, 0, 0]);

    let packed = session
        .value(
            "struct packed_pair",
            ValueTemplate::fields([("a", 1), ("b", 2)]),
        )
        .unwrap();
    assert_eq!(packed.bytes(), &[1, 0, 0, 0, 2]);
    session.finish().unwrap();
}

#[test]
fn test_union_members_last_write_wins() {
    let mut session = session();
    let word = session
        .value("union word", ValueTemplate::union_of([("c", 1), ("l", 421)]))
        .unwrap();
    assert_eq!(word.len(), 8);
    assert_eq!(word.field("l").unwrap().as_i64().unwrap(), 421);
    assert_eq!(word.field("c").unwrap().bytes(), &[(421 & 0xff) as u8]);
    session.finish().unwrap();
}

#[test]
fn test_pointer_template_allocates_exact_size() {
    let mut session = session();
    let node = session
        .value(
            "struct node *",
            ValueTemplate::fields([
                ("value", ValueTemplate::int(42)),
                ("next", ValueTemplate::null()),
            ]),
        )
        .unwrap();
    let address = node.address().unwrap();
    assert_eq!(session.engine().block_size(address), Some(16));
    assert_eq!(session.marshalled_allocations(), 1);
    assert!(!session.malloced(address));
    assert_eq!(session.allocated_size(), 0);

    let pointee = session.dereference(&node).unwrap();
    assert_eq!(pointee.field("value").unwrap().as_i64().unwrap(), 42);
    assert_eq!(pointee.field("next").unwrap().address().unwrap(), 0);

    let report = session.finish().unwrap();
    assert_eq!(report.released, vec![address]);
    assert_eq!(session.engine().live_blocks(), 0);
}

#[test]
fn test_array_argument_decays_to_pointer() {
    let mut session = session();
    let total = session
        .call(
            "sum",
            &[
                ValueTemplate::array([1, 2, 3, 4]).into(),
                ValueTemplate::int(4).into(),
            ],
        )
        .unwrap()
        .unwrap();
    assert_eq!(total.as_i64().unwrap(), 10);
    assert_eq!(session.marshalled_allocations(), 1);
    session.finish().unwrap();
}

#[test]
fn test_string_argument_is_allocated() {
    let mut session = session();
    let length = session
        .call("strlen", &[ValueTemplate::string("hello").into()])
        .unwrap()
        .unwrap();
    assert_eq!(length.as_u64().unwrap(), 5);

    let text = session.string("hi").unwrap();
    assert_eq!(text.bytes(), b"hi\0");
    assert_eq!(text.as_c_string().unwrap(), "hi");
    session.finish().unwrap();
}

#[test]
fn test_cycle_built_by_backpatching() {
    let mut session = session();
    let first = session
        .allocate(
            "struct node",
            ValueTemplate::fields([
                ("value", ValueTemplate::int(1)),
                ("next", ValueTemplate::null()),
            ]),
        )
        .unwrap();
    let first_address = first.address().unwrap();
    let second = session
        .allocate(
            "struct node",
            ValueTemplate::fields([
                ("value", ValueTemplate::int(2)),
                ("next", ValueTemplate::address(first_address)),
            ]),
        )
        .unwrap();
    let second_address = second.address().unwrap();
    session
        .write_memory(first_address + 8, &second_address.to_le_bytes())
        .unwrap();

    let back = session.dereference(&first).unwrap();
    assert_eq!(back.field("next").unwrap().address().unwrap(), second_address);

    // the target walks the cycle until its own bound
    let length = session.call("list_length", &[second.into()]).unwrap().unwrap();
    assert_eq!(length.as_i64().unwrap(), 100);

    let report = session.finish().unwrap();
    assert_eq!(report.released.len(), 2);
}

#[test]
fn test_shape_mismatch_allocates_nothing() {
    let mut session = session();
    let err = session
        .value(
            "struct node *",
            ValueTemplate::fields([
                ("value", ValueTemplate::int(1)),
                (
                    "next",
                    ValueTemplate::fields([
                        ("value", ValueTemplate::string("not a number")),
                        ("next", ValueTemplate::null()),
                    ]),
                ),
            ]),
        )
        .unwrap_err();
    assert!(matches!(err, ProbeError::Encoding(_)));
    assert_eq!(session.marshalled_allocations(), 0);
    assert_eq!(session.engine().live_blocks(), 0);
    session.finish().unwrap();
}

#[test]
fn test_unknown_type_is_reported() {
    let mut session = session();
    let err = session.value("struct missing", 1).unwrap_err();
    assert!(matches!(
        err,
        ProbeError::Encoding(EncodingError::UnknownType(_))
    ));
    session.finish().unwrap();
}

#[test]
fn test_enum_by_name() {
    let mut session = session();
    let blue = session.value("enum color", "BLUE").unwrap();
    assert_eq!(blue.as_i64().unwrap(), 4);
    assert!(session.value("enum color", "PURPLE").is_err());
    session.finish().unwrap();
}

#[test]
fn test_flexible_array_member() {
    let mut session = session();
    let message = session
        .value(
            "struct message",
            ValueTemplate::fields([
                ("len", ValueTemplate::int(3)),
                ("data", ValueTemplate::string("abc")),
            ]),
        )
        .unwrap();
    // 4 + 4 chars, already 4-aligned
    assert_eq!(message.len(), 8);
    assert_eq!(&message.bytes()[4..], b"abc\0");
    session.finish().unwrap();
}

#[test]
fn test_pointer_helpers() {
    let mut session = session();
    let value = session.value("long", 7).unwrap();
    let pointer = session.pointer_to(&value).unwrap();
    assert_eq!(pointer.ty().name, "long *");
    assert_eq!(session.dereference(&pointer).unwrap().as_i64().unwrap(), 7);

    let raw = session.raw_pointer("long", pointer.address().unwrap()).unwrap();
    assert_eq!(raw, pointer);
    session.finish().unwrap();
}
