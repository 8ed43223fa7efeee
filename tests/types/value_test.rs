use pulih::types::{
    row::Row,
    value::{DataType, Value},
};

#[test]
fn test_value_data_types() {
    assert_eq!(Value::Null.data_type(), DataType::Null);
    assert_eq!(Value::Integer(42).data_type(), DataType::Integer);
    assert_eq!(Value::Real(2.5).data_type(), DataType::Real);
    assert_eq!(Value::Text("hello".to_string()).data_type(), DataType::Text);
    assert_eq!(Value::Blob(vec![1, 2, 3]).data_type(), DataType::Blob);
}

#[test]
fn test_affinity_from_declared_type() {
    assert_eq!(DataType::from_declared(Some("INTEGER")), DataType::Integer);
    assert_eq!(DataType::from_declared(Some("BIGINT")), DataType::Integer);
    assert_eq!(DataType::from_declared(Some("VARCHAR(255)")), DataType::Text);
    assert_eq!(DataType::from_declared(Some("STRING")), DataType::Numeric);
    assert_eq!(DataType::from_declared(Some("DOUBLE PRECISION")), DataType::Real);
    assert_eq!(DataType::from_declared(Some("blob")), DataType::Blob);
    assert_eq!(DataType::from_declared(None), DataType::Blob);
}

#[test]
fn test_value_accessors_and_display() {
    assert_eq!(Value::Integer(7).as_i64(), Some(7));
    assert_eq!(Value::Text("x".to_string()).as_i64(), None);
    assert_eq!(Value::Text("body".to_string()).as_str(), Some("body"));
    assert_eq!(DataType::Numeric.to_string(), "NUMERIC");
    assert_eq!(Value::Blob(vec![0xde, 0xad]).to_string(), "x'dead'");
    assert_eq!(Value::Null.to_string(), "NULL");
    assert!(Value::Null.is_null());
}

#[test]
fn test_row_identity() {
    let row = Row::new("messages", 9, vec![Value::Text("a".to_string()), Value::Null]);
    assert_eq!(row.key(), ("messages".to_string(), 9));
    assert_eq!(row.get_value(0), Some(&Value::Text("a".to_string())));
    assert_eq!(row.get_value(5), None);
}
