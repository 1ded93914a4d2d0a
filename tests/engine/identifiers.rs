use mongolite::parse_object_id;

#[test]
fn round_trips_valid_hex() {
    let oid = parse_object_id("507f1f77bcf86cd799439011").unwrap();
    assert_eq!(oid.to_hex(), "507f1f77bcf86cd799439011");
    assert_eq!(oid.bytes().len(), 12);
}

#[test]
fn rejects_bad_length_and_non_hex() {
    assert_eq!(parse_object_id("abc").unwrap_err().code(), Some(15));
    assert_eq!(
        parse_object_id("zzzzzzzzzzzzzzzzzzzzzzzz").unwrap_err().code(),
        Some(15)
    );
}

#[test]
fn equality_is_over_bytes() {
    let a = parse_object_id("507f1f77bcf86cd799439011").unwrap();
    let b = parse_object_id("507f1f77bcf86cd799439011").unwrap();
    let c = parse_object_id("507f1f77bcf86cd799439012").unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
}
