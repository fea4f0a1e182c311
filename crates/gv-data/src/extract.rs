//! Bulk extraction of Arrow columns into attribute values
//!
//! Numeric primitives are read straight from the array's value buffer in one
//! pass; everything else goes element by element.

use arrow::array::{Array, AsArray};
use arrow::datatypes::{
    DataType, Date32Type, Date64Type, Float16Type, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type,
    TimeUnit, TimestampMicrosecondType, TimestampMillisecondType, TimestampNanosecondType, TimestampSecondType,
    UInt16Type, UInt32Type, UInt64Type, UInt8Type, ArrowPrimitiveType, ArrowTemporalType,
};
use arrow::util::display::{ArrayFormatter, FormatOptions};
use gv_core::AttributeValue;
use num_traits::AsPrimitive;
use tracing::warn;

/// Convert a whole column
pub fn extract(column: &dyn Array) -> Vec<AttributeValue> {
    let mut values = Vec::with_capacity(column.len());
    extract_into(&mut values, column);
    values
}

/// Append a column's values to `target`
pub fn extract_into(target: &mut Vec<AttributeValue>, column: &dyn Array) {
    target.reserve(column.len());

    match column.data_type() {
        DataType::Int8 => primitive::<Int8Type>(target, column, int),
        DataType::Int16 => primitive::<Int16Type>(target, column, int),
        DataType::Int32 => primitive::<Int32Type>(target, column, int),
        DataType::Int64 => primitive::<Int64Type>(target, column, int),
        DataType::UInt8 => primitive::<UInt8Type>(target, column, uint),
        DataType::UInt16 => primitive::<UInt16Type>(target, column, uint),
        DataType::UInt32 => primitive::<UInt32Type>(target, column, uint),
        DataType::UInt64 => primitive::<UInt64Type>(target, column, uint),
        DataType::Float16 => primitive::<Float16Type>(target, column, half),
        DataType::Float32 => primitive::<Float32Type>(target, column, float),
        DataType::Float64 => primitive::<Float64Type>(target, column, float),
        DataType::Null => target.extend((0..column.len()).map(|_| AttributeValue::Null)),
        DataType::Boolean => {
            let array = column.as_boolean();
            target.extend(array.iter().map(|v| v.map_or(AttributeValue::Null, AttributeValue::Bool)));
        }
        DataType::Utf8 => strings(target, column.as_string::<i32>().iter()),
        DataType::LargeUtf8 => strings(target, column.as_string::<i64>().iter()),
        DataType::Date32 => {
            let array = column.as_primitive::<Date32Type>();
            target.extend((0..array.len()).map(|i| {
                if array.is_null(i) {
                    return AttributeValue::Null;
                }
                array.value_as_date(i).map_or(AttributeValue::Null, AttributeValue::Date)
            }));
        }
        DataType::Date64 => {
            let array = column.as_primitive::<Date64Type>();
            target.extend((0..array.len()).map(|i| {
                if array.is_null(i) {
                    return AttributeValue::Null;
                }
                array.value_as_date(i).map_or(AttributeValue::Null, AttributeValue::Date)
            }));
        }
        DataType::Timestamp(unit, _) => match unit {
            TimeUnit::Second => timestamps::<TimestampSecondType>(target, column),
            TimeUnit::Millisecond => timestamps::<TimestampMillisecondType>(target, column),
            TimeUnit::Microsecond => timestamps::<TimestampMicrosecondType>(target, column),
            TimeUnit::Nanosecond => timestamps::<TimestampNanosecondType>(target, column),
        },
        _ => formatted(target, column),
    }
}

fn int<N: AsPrimitive<i64>>(value: N) -> AttributeValue {
    AttributeValue::Int(value.as_())
}

fn uint<N: AsPrimitive<u64>>(value: N) -> AttributeValue {
    AttributeValue::UInt(value.as_())
}

fn float<N: AsPrimitive<f64>>(value: N) -> AttributeValue {
    AttributeValue::Float(value.as_())
}

fn half<N: Into<f32>>(value: N) -> AttributeValue {
    AttributeValue::Float(f64::from(value.into()))
}

/// Typed view over the value buffer; nulls are patched in from the validity
/// bitmap
fn primitive<T>(target: &mut Vec<AttributeValue>, column: &dyn Array, convert: fn(T::Native) -> AttributeValue)
where
    T: ArrowPrimitiveType,
{
    let array = column.as_primitive::<T>();
    let values: &[T::Native] = array.values();
    match array.nulls() {
        None => target.extend(values.iter().map(|&v| convert(v))),
        Some(nulls) => target.extend(values.iter().enumerate().map(|(i, &v)| {
            if nulls.is_valid(i) {
                convert(v)
            } else {
                AttributeValue::Null
            }
        })),
    }
}

fn strings<'a>(target: &mut Vec<AttributeValue>, values: impl Iterator<Item = Option<&'a str>>) {
    target.extend(values.map(|v| v.map_or(AttributeValue::Null, |s| AttributeValue::Text(s.to_string()))));
}

fn timestamps<T>(target: &mut Vec<AttributeValue>, column: &dyn Array)
where
    T: ArrowTemporalType,
    i64: From<T::Native>,
{
    let array = column.as_primitive::<T>();
    target.extend((0..array.len()).map(|i| {
        if array.is_null(i) {
            return AttributeValue::Null;
        }
        array
            .value_as_datetime(i)
            .map_or(AttributeValue::Null, AttributeValue::Timestamp)
    }));
}

/// Anything without a dedicated path is rendered with Arrow's display rules
fn formatted(target: &mut Vec<AttributeValue>, column: &dyn Array) {
    let options = FormatOptions::default();
    match ArrayFormatter::try_new(column, &options) {
        Ok(formatter) => target.extend((0..column.len()).map(|i| {
            if column.is_null(i) {
                AttributeValue::Null
            } else {
                AttributeValue::Text(formatter.value(i).to_string())
            }
        })),
        Err(error) => {
            warn!(data_type = %column.data_type(), %error, "Cannot display column, using nulls");
            target.extend((0..column.len()).map(|_| AttributeValue::Null));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{
        BooleanArray, Date32Array, Float32Array, Int16Array, ListArray, StringArray, TimestampMillisecondArray,
        UInt8Array,
    };
    use chrono::NaiveDate;

    #[test]
    fn test_float32_keeps_nan() {
        let column = Float32Array::from(vec![1.5, 2.5, f32::NAN]);
        let values = extract(&column);
        assert_eq!(values[0], AttributeValue::Float(1.5));
        assert_eq!(values[1], AttributeValue::Float(2.5));
        assert!(matches!(values[2], AttributeValue::Float(v) if v.is_nan()));
    }

    #[test]
    fn test_float16_is_numeric() {
        let source = Float32Array::from(vec![Some(1.5), None, Some(f32::NAN)]);
        let column = arrow::compute::cast(&source, &DataType::Float16).unwrap();
        let values = extract(column.as_ref());
        assert_eq!(values[0], AttributeValue::Float(1.5));
        assert_eq!(values[1], AttributeValue::Null);
        assert!(matches!(values[2], AttributeValue::Float(v) if v.is_nan()));
    }

    #[test]
    fn test_integers_with_nulls() {
        let column = Int16Array::from(vec![Some(-3), None, Some(7)]);
        assert_eq!(
            extract(&column),
            vec![AttributeValue::Int(-3), AttributeValue::Null, AttributeValue::Int(7)]
        );

        let column = UInt8Array::from(vec![255]);
        assert_eq!(extract(&column), vec![AttributeValue::UInt(255)]);
    }

    #[test]
    fn test_strings_and_booleans() {
        let column = StringArray::from(vec![Some("a"), None]);
        assert_eq!(extract(&column), vec![AttributeValue::Text("a".into()), AttributeValue::Null]);

        let column = BooleanArray::from(vec![Some(true), None]);
        assert_eq!(extract(&column), vec![AttributeValue::Bool(true), AttributeValue::Null]);
    }

    #[test]
    fn test_temporal() {
        let column = Date32Array::from(vec![Some(19_000), None]);
        assert_eq!(
            extract(&column),
            vec![
                AttributeValue::Date(NaiveDate::from_ymd_opt(2022, 1, 8).unwrap()),
                AttributeValue::Null
            ]
        );

        let column = TimestampMillisecondArray::from(vec![1_000]);
        let expected = NaiveDate::from_ymd_opt(1970, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 1)
            .unwrap();
        assert_eq!(extract(&column), vec![AttributeValue::Timestamp(expected)]);
    }

    #[test]
    fn test_nested_values_are_formatted() {
        let column = ListArray::from_iter_primitive::<Int32Type, _, _>(vec![Some(vec![Some(1), Some(2)]), None]);
        assert_eq!(
            extract(&column),
            vec![AttributeValue::Text("[1, 2]".into()), AttributeValue::Null]
        );
    }

    #[test]
    fn test_extract_into_appends() {
        let mut values = vec![AttributeValue::Int(0)];
        extract_into(&mut values, &Int16Array::from(vec![1]));
        assert_eq!(values, vec![AttributeValue::Int(0), AttributeValue::Int(1)]);
    }
}
