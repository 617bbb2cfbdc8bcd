//! End-to-end tests: definition text in, parsed value tree out.

use sonde::core::binary::BinaryError;
use sonde::core::value::ValueKind;
use sonde::driver::Error;
use sonde::Options;

fn parse(definition: &str, data: &[u8]) -> sonde::core::value::Value {
    sonde::parse(definition, data, Options::default()).expect("parse failed")
}

#[test]
fn fixed_struct() {
    let value = parse("x U8\ny U8\n", &[0x10, 0x20]);
    assert_eq!(value.get("x").unwrap().as_int(), Some(0x10));
    assert_eq!(value.get("y").unwrap().as_int(), Some(0x20));
}

#[test]
fn integers_are_little_endian() {
    let value = parse("x U16\ny U32\n", &[0x34, 0x12, 0x78, 0x56, 0x34, 0x12]);
    assert_eq!(value.get("x").unwrap().as_int(), Some(0x1234));
    assert_eq!(value.get("y").unwrap().as_int(), Some(0x12345678));
}

#[test]
fn multi_byte_raw_reads_reverse() {
    let value = parse("w Word\n", &[0x78, 0x56, 0x34, 0x12]);
    assert_eq!(
        value.get("w").unwrap().as_bytes(),
        Some(&[0x12, 0x34, 0x56, 0x78][..])
    );
}

#[test]
fn dynamic_array_length() {
    let value = parse("count U8\nbytes [count]U8\n", &[0x03, 0xaa, 0xbb, 0xcc]);
    assert_eq!(value.get("count").unwrap().as_int(), Some(3));
    let bytes = value.get("bytes").unwrap();
    assert_eq!(bytes.len(), Some(3));
    assert_eq!(bytes.index(0).unwrap().as_int(), Some(0xaa));
    assert_eq!(bytes.index(2).unwrap().as_int(), Some(0xcc));
}

#[test]
fn byte_arrays_collapse_to_byte_strings() {
    let value = parse("data [4]Byte\n", &[1, 2, 3, 4]);
    assert_eq!(value.get("data").unwrap().as_bytes(), Some(&[1, 2, 3, 4][..]));
}

#[test]
fn pointer_reads_elsewhere_and_restores_position() {
    let mut data = vec![0x10, 0x00];
    data.extend_from_slice(&[0x07; 1]);
    data.extend_from_slice(&[0x00; 13]);
    data.push(0xaa);
    let value = parse("ptr U16\nnext U8\nval @ptr U8\n", &data);
    assert_eq!(value.get("ptr").unwrap().as_int(), Some(0x10));
    // The pointer at offset 2 must not disturb the byte after it.
    assert_eq!(value.get("next").unwrap().as_int(), Some(0x07));
    let val = value.get("val").unwrap();
    assert_eq!(val.as_int(), Some(0xaa));
    assert_eq!(val.pointer(), Some(0x10));
    assert_eq!(val.address(), Some(0x10));
}

#[test]
fn bits_read_lsb_first() {
    let value = parse("a B1\nb B1\ntwo [2]B1\nrest B4\n", &[0x07]);
    assert_eq!(value.get("a").unwrap().as_int(), Some(1));
    assert_eq!(value.get("b").unwrap().as_int(), Some(1));
    let two = value.get("two").unwrap();
    assert_eq!(two.index(0).unwrap().as_int(), Some(1));
    assert_eq!(two.index(1).unwrap().as_int(), Some(0));
    assert_eq!(value.get("rest").unwrap().as_int(), Some(0));
}

#[test]
fn unbounded_integer_arrays_keep_the_zero() {
    let value = parse("data []U8\n", &[0xaa, 0xbb, 0x00]);
    let data = value.get("data").unwrap();
    assert_eq!(data.len(), Some(3));
    assert_eq!(data.index(2).unwrap().as_int(), Some(0));
}

#[test]
fn terminator_tokens_end_arrays_exclusively() {
    let value = parse(
        "text []U8 char match {\n    0 => :End Terminator\n    0x41 => \"A\"\n    0x42 => \"B\"\n}\n",
        &[0x41, 0x42, 0x41, 0x00],
    );
    assert_eq!(value.get("text").unwrap().as_str(), Some("ABA"));
}

#[test]
fn match_dispatch() {
    let definition = "kind U8 match {\n    1 => =100\n    2..5 => =200\n    value => =value\n}\n";
    assert_eq!(parse(definition, &[1]).get("kind").unwrap().as_int(), Some(100));
    assert_eq!(parse(definition, &[3]).get("kind").unwrap().as_int(), Some(200));
    assert_eq!(parse(definition, &[9]).get("kind").unwrap().as_int(), Some(9));
}

#[test]
fn unmatched_values_fail_with_their_value() {
    let error = sonde::parse(
        "kind U8 match {\n    1 => =100\n}\n",
        &[9],
        Options::default(),
    )
    .unwrap_err();
    assert!(matches!(
        error,
        Error::Binary(BinaryError::Match { ref value, .. }) if value == "9"
    ));
}

#[test]
fn match_keys_auto_increment() {
    let definition = "speed U8 match {\n    :Slow\n    :Mid\n    :Fast\n}\n";
    let value = parse(definition, &[1]);
    assert_eq!(value.get("speed").unwrap().to_string(), "<Mid>");
}

#[test]
fn pipes_conserve_bytes() {
    let value = parse(
        "out [4]Byte | {\n    a [2]Byte\n    b [2]Byte\n}\n",
        &[1, 2, 3, 4],
    );
    let out = value.get("out").unwrap();
    assert_eq!(out.get("a").unwrap().as_bytes(), Some(&[1, 2][..]));
    assert_eq!(out.get("b").unwrap().as_bytes(), Some(&[3, 4][..]));
}

#[test]
fn yields_feed_the_pipe_buffer() {
    let value = parse(
        "out {\n    skip U8\n    yield [2]Byte\n    yield [2]Byte\n} | [4]Byte\n",
        &[0x01, 0x02, 0x03, 0x04, 0x05],
    );
    assert_eq!(
        value.get("out").unwrap().as_bytes(),
        Some(&[0x02, 0x03, 0x04, 0x05][..])
    );
}

#[test]
fn pipe_pointers_reread_the_buffer() {
    let value = parse(
        "out {\n    yield [4]Byte\n    yield |@0 [2]Byte\n    yield [1]Byte\n} | [7]Byte\n",
        &[1, 2, 3, 4, 5],
    );
    assert_eq!(
        value.get("out").unwrap().as_bytes(),
        Some(&[1, 2, 3, 4, 1, 2, 5][..])
    );
}

#[test]
fn pipe_pointers_count_back_from_the_write_position() {
    let value = parse(
        "out {\n    yield [4]Byte\n    yield |@(-2) [2]Byte\n} | [6]Byte\n",
        &[1, 2, 3, 4],
    );
    assert_eq!(
        value.get("out").unwrap().as_bytes(),
        Some(&[1, 2, 3, 4, 3, 4][..])
    );
}

#[test]
fn foreign_assignment_targets_earlier_structs() {
    let definition = "\
pack {
    x U8
    nested {
    }
}
foo U8
pack.y U8
pack.nested.bar U8
";
    let value = parse(definition, &[1, 2, 3, 4]);
    let pack = value.get("pack").unwrap();
    assert_eq!(pack.get("x").unwrap().as_int(), Some(1));
    assert_eq!(value.get("foo").unwrap().as_int(), Some(2));
    assert_eq!(pack.get("y").unwrap().as_int(), Some(3));
    let nested = pack.get("nested").unwrap();
    assert_eq!(nested.get("bar").unwrap().as_int(), Some(4));
}

#[test]
fn foreign_assignment_needs_a_known_target() {
    let error = sonde::parse("unknown.x U8\n", &[1], Options::default()).unwrap_err();
    match error {
        Error::Resolve(error) => assert!(error.to_string().contains("not defined")),
        error => panic!("expected a resolve error, got {error}"),
    }
}

#[test]
fn foreign_list_assignment_distributes_elementwise() {
    let definition = "stuff [4]{\n    a U8\n    b U8\n    c U8\n}\nstuff[].d [4]U8\n";
    let data = [
        0x0a, 0x0b, 0x0c, 0x1a, 0x1b, 0x1c, 0x2a, 0x2b, 0x2c, 0x3a, 0x3b, 0x3c, // stuff
        0x0d, 0x1d, 0x2d, 0x3d, // d
    ];
    let value = parse(definition, &data);
    let stuff = value.get("stuff").unwrap();
    assert_eq!(stuff.index(0).unwrap().get("a").unwrap().as_int(), Some(0x0a));
    assert_eq!(stuff.index(0).unwrap().get("d").unwrap().as_int(), Some(0x0d));
    assert_eq!(stuff.index(3).unwrap().get("a").unwrap().as_int(), Some(0x3a));
    assert_eq!(stuff.index(3).unwrap().get("d").unwrap().as_int(), Some(0x3d));
}

#[test]
fn foreign_list_assignment_rejects_non_lists() {
    let definition = "stuff {\n    a U8\n}\nstuff[].b [4]U8\n";
    let error = sonde::parse(definition, &[0; 8], Options::default()).unwrap_err();
    match error {
        Error::Binary(BinaryError::Parse { message, .. }) => {
            assert!(message.contains("needs a list"), "{message}");
        }
        error => panic!("expected a parse error, got {error}"),
    }
}

#[test]
fn foreign_list_assignment_rejects_length_mismatches() {
    let definition = "stuff [5]{\n    a U8\n}\nstuff[].b [4]U8\n";
    let error = sonde::parse(definition, &[0; 16], Options::default()).unwrap_err();
    match error {
        Error::Binary(BinaryError::Parse { message, .. }) => {
            assert!(message.contains("length mismatch"), "{message}");
        }
        error => panic!("expected a parse error, got {error}"),
    }
}

#[test]
fn foreign_keys_follow_against_the_root() {
    let value = parse("items [3]U8\npick U8 -> items\n", &[10, 11, 12, 1]);
    let pick = value.get("pick").unwrap();
    assert!(matches!(pick.kind, ValueKind::Foreign(_)));
    assert_eq!(pick.follow(&value).unwrap().as_int(), Some(11));
}

#[test]
fn dangling_foreign_keys_fail_on_follow() {
    let value = parse("items [3]U8\npick U8 -> items\n", &[10, 11, 12, 9]);
    assert!(value.get("pick").unwrap().follow(&value).is_err());
}

#[test]
fn false_conditions_leave_fields_absent() {
    let definition = "flag U8\n!if flag == 1 {\n    extra U8\n}\n";
    let value = parse(definition, &[1, 9]);
    assert_eq!(value.get("extra").unwrap().as_int(), Some(9));
    let value = parse(definition, &[0]);
    assert!(value.get("extra").is_none());
}

#[test]
fn else_branches_embed_their_fields() {
    let definition = "flag U8\n!if flag {\n    a U8\n} !else {\n    b U8\n}\n";
    let value = parse(definition, &[0, 5]);
    assert!(value.get("a").is_none());
    assert_eq!(value.get("b").unwrap().as_int(), Some(5));
}

#[test]
fn if_and_else_branches_may_share_field_names() {
    let definition = "flag U8\n!if flag {\n    x = 1\n    y = 1\n} !else {\n    y = 0\n    x = 0\n}\n";
    let value = parse(definition, &[0]);
    assert_eq!(value.get("x").unwrap().as_int(), Some(0));
    assert_eq!(value.get("y").unwrap().as_int(), Some(0));
    let value = parse(definition, &[1]);
    assert_eq!(value.get("x").unwrap().as_int(), Some(1));
    assert_eq!(value.get("y").unwrap().as_int(), Some(1));
}

#[test]
fn computed_fields_and_returns() {
    let value = parse(":Point {\n    x U8\n    y U8\n    sum = x + y\n}\np Point\n", &[2, 3]);
    assert_eq!(value.get("p").unwrap().get("sum").unwrap().as_int(), Some(5));

    let value = parse(":Doubled {\n    v U8\n    = v * 2\n}\nx Doubled\n", &[4]);
    assert_eq!(value.get("x").unwrap().as_int(), Some(8));
}

#[test]
fn parametric_types_specialize_per_call() {
    let value = parse(
        ":Pair(T) {\n    first T\n    second T\n}\np Pair(U8)\nq Pair(U16)\n",
        &[1, 2, 3, 0, 4, 0],
    );
    let q = value.get("q").unwrap();
    assert_eq!(value.get("p").unwrap().get("second").unwrap().as_int(), Some(2));
    assert_eq!(q.get("first").unwrap().as_int(), Some(3));
    assert_eq!(q.get("second").unwrap().as_int(), Some(4));
}

#[test]
fn provenance_is_tracked() {
    let value = parse("x U16\ny U8\n", &[0x34, 0x12, 0x07]);
    let y = value.get("y").unwrap();
    assert_eq!(y.address(), Some(2));
    assert_eq!(y.size(), Some(1));
    assert_eq!(value.size(), Some(3));
}

#[test]
fn rich_mode_attaches_paths() {
    let options = Options {
        rich: true,
        ..Options::default()
    };
    let value = sonde::parse(":Inner {\n    y U8\n}\nx U8\ninner Inner\n", &[1, 2], options)
        .expect("parse failed");
    let y = value.get("inner").unwrap().get("y").unwrap();
    assert_eq!(y.path(), Some("inner.y"));
}

#[test]
fn match_default_arms_keep_the_field_path() {
    let options = Options {
        rich: true,
        ..Options::default()
    };
    let value = sonde::parse(
        "x U8 match {\n    0 => =1\n    other => U8\n}\n",
        &[9, 5],
        options,
    )
    .expect("parse failed");
    let x = value.get("x").unwrap();
    assert_eq!(x.as_int(), Some(5));
    assert_eq!(x.path(), Some("x"));
}

#[test]
fn truncated_input_is_fatal_by_default() {
    let error = sonde::parse("a U8\nb U8\n", &[1], Options::default()).unwrap_err();
    assert!(matches!(error, Error::Binary(_)));
}

#[test]
fn lenient_mode_recovers_per_field() {
    let options = Options {
        lenient: true,
        ..Options::default()
    };
    let value = sonde::parse("a U8\nb U8\n", &[1], options).expect("parse failed");
    assert_eq!(value.get("a").unwrap().as_int(), Some(1));
    assert!(matches!(value.get("b").unwrap().kind, ValueKind::Error(_)));
    assert!(value.has_error());
}

#[test]
fn unknown_names_get_a_hint() {
    let error = sonde::parse("a u8\n", &[1], Options::default()).unwrap_err();
    match error {
        Error::Resolve(error) => assert!(error.to_string().contains("did you mean")),
        error => panic!("expected a resolve error, got {error}"),
    }
}

#[test]
fn imports_load_sibling_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("colors.dm"), ":Color U16\n").unwrap();
    let main = dir.path().join("main.dm");
    std::fs::write(&main, "!import colors\nc Color\n").unwrap();

    let value = sonde::parse_file(&main, &[0x34, 0x12], Options::default()).expect("parse failed");
    assert_eq!(value.get("c").unwrap().as_int(), Some(0x1234));
}

#[test]
fn tilesets_combine_with_palettes_into_images() {
    let mut data = vec![0xff; 16]; // one GB tile
    data.extend_from_slice(&[0x00, 0x00, 0xff, 0x7f, 0x1f, 0x00, 0xe0, 0x03]); // four colors
    let definition = "\
:GBColor RGBColor {
    r B5
    g B5
    b B5
    _ B1
    max = 31
}
image [1]GBTile | [4]GBColor
";
    let value = parse(definition, &data);
    match &value.get("image").unwrap().kind {
        ValueKind::Image { tiles, palette } => {
            assert_eq!(tiles.len(), Some(1));
            assert_eq!(palette.len(), Some(4));
        }
        other => panic!("expected an image, got {other:?}"),
    }
}

#[test]
fn saving_writes_png_files() {
    let dir = tempfile::tempdir().unwrap();
    let options = Options {
        output_dir: Some(dir.path().to_path_buf()),
        ..Options::default()
    };
    let data = [0xff; 16];
    sonde::parse("tile NESTile\n!save tile\n", &data, options).expect("parse failed");
    assert!(dir.path().join("tile.png").is_file());
}
