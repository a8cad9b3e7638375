//! Binary payloads carried as base64 strings inside JSON.
//!
//! Outbound parameters that are byte buffers, arrays or images are serialized
//! to their container format and base64-encoded. Inbound base64 strings are
//! sniffed: NPY magic first, then known image containers, else opaque bytes.
//! The wire carries no type tag, so a plain string that happens to be valid
//! base64 decodes as bytes. Callers that know the expected type should use the
//! typed decoders instead of [`Payload::sniff`].

mod npy;
mod raster;

pub use npy::{NdArray, NPY_MAGIC};
pub use raster::ImagePayload;

use crate::error::ProtocolError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Value};

/// A call parameter before base64 substitution.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Json(Value),
    Bytes(Vec<u8>),
    Array(NdArray),
    Image(ImagePayload),
}

impl Param {
    /// Converts into the JSON value sent on the wire.
    pub fn pack(self) -> Result<Value, ProtocolError> {
        match self {
            Param::Json(value) => Ok(value),
            Param::Bytes(bytes) => Ok(Value::String(STANDARD.encode(bytes))),
            Param::Array(array) => Ok(Value::String(STANDARD.encode(array.to_npy()))),
            Param::Image(image) => Ok(Value::String(STANDARD.encode(image.encode()?))),
        }
    }
}

impl From<Value> for Param {
    fn from(value: Value) -> Self {
        Param::Json(value)
    }
}

impl From<Vec<u8>> for Param {
    fn from(bytes: Vec<u8>) -> Self {
        Param::Bytes(bytes)
    }
}

impl From<&[u8]> for Param {
    fn from(bytes: &[u8]) -> Self {
        Param::Bytes(bytes.to_vec())
    }
}

impl From<NdArray> for Param {
    fn from(array: NdArray) -> Self {
        Param::Array(array)
    }
}

impl From<ImagePayload> for Param {
    fn from(image: ImagePayload) -> Self {
        Param::Image(image)
    }
}

macro_rules! impl_from_scalar {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Param {
                fn from(value: $ty) -> Self {
                    Param::Json(Value::from(value))
                }
            }
        )*
    };
}

impl_from_scalar!(bool, i32, i64, u32, u64, f64, String, &str);

/// Packs positional parameters into a JSON array.
pub fn pack_positional(params: Vec<Param>) -> Result<Value, ProtocolError> {
    params
        .into_iter()
        .map(Param::pack)
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

/// Packs named parameters into a JSON object.
pub fn pack_named(params: Vec<(String, Param)>) -> Result<Value, ProtocolError> {
    let mut map = Map::with_capacity(params.len());
    for (name, param) in params {
        map.insert(name, param.pack()?);
    }
    Ok(Value::Object(map))
}

/// A result value after binary sniffing.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Bytes(Vec<u8>),
    Array(NdArray),
    Image(ImagePayload),
}

impl Payload {
    /// Best-effort identification of a result value.
    ///
    /// Non-strings, empty strings and strings that are not base64 stay JSON.
    pub fn sniff(value: &Value) -> Payload {
        let Value::String(text) = value else {
            return Payload::Json(value.clone());
        };
        if text.is_empty() {
            return Payload::Json(value.clone());
        }
        match STANDARD.decode(text) {
            Ok(bytes) => Payload::sniff_bytes(bytes),
            Err(_) => Payload::Json(value.clone()),
        }
    }

    /// Identifies already decoded bytes.
    pub fn sniff_bytes(bytes: Vec<u8>) -> Payload {
        if bytes.starts_with(NPY_MAGIC) {
            if let Ok(array) = NdArray::from_npy(&bytes) {
                return Payload::Array(array);
            }
        }
        if image::guess_format(&bytes).is_ok() {
            if let Ok(image) = ImagePayload::decode(&bytes) {
                return Payload::Image(image);
            }
        }
        Payload::Bytes(bytes)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Json(_) => "json",
            Payload::Bytes(_) => "bytes",
            Payload::Array(_) => "array",
            Payload::Image(_) => "image",
        }
    }
}

/// Decodes a base64 string value into bytes.
pub fn decode_bytes(value: &Value) -> Result<Vec<u8>, ProtocolError> {
    let text = value
        .as_str()
        .ok_or_else(|| ProtocolError::malformed("expected a base64 string", value.to_string().as_bytes()))?;
    Ok(STANDARD.decode(text)?)
}

/// Decodes a base64 string value holding an NPY container.
pub fn decode_array(value: &Value) -> Result<NdArray, ProtocolError> {
    NdArray::from_npy(&decode_bytes(value)?)
}

/// Decodes a base64 string value holding an image container.
pub fn decode_image(value: &Value) -> Result<ImagePayload, ProtocolError> {
    ImagePayload::decode(&decode_bytes(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, Luma};
    use ndarray::arr2;
    use serde_json::json;

    #[test]
    fn test_json_params_pass_through() {
        let packed = pack_named(vec![
            ("a".to_string(), Param::from(2)),
            ("name".to_string(), Param::from("x")),
            ("flag".to_string(), Param::from(true)),
        ])
        .unwrap();
        assert_eq!(packed, json!({"a": 2, "name": "x", "flag": true}));
    }

    #[test]
    fn test_bytes_param_is_base64() {
        let packed = pack_positional(vec![Param::from(&b"hello"[..])]).unwrap();
        assert_eq!(packed, json!(["aGVsbG8="]));
    }

    #[test]
    fn test_array_param_sniffs_back() {
        let array = NdArray::from(arr2(&[[1.5f32, 2.5], [3.5, 4.5]]).into_dyn());
        let packed = Param::from(array.clone()).pack().unwrap();
        assert_eq!(Payload::sniff(&packed), Payload::Array(array.clone()));
        assert_eq!(decode_array(&packed).unwrap(), array);
    }

    #[test]
    fn test_image_param_sniffs_back() {
        let gray = GrayImage::from_fn(5, 3, |x, y| Luma([(x * 40 + y) as u8]));
        let image = ImagePayload::new(DynamicImage::ImageLuma8(gray));
        let packed = Param::from(image.clone()).pack().unwrap();

        match Payload::sniff(&packed) {
            Payload::Image(decoded) => {
                assert_eq!(decoded.image.to_luma8(), image.image.to_luma8());
            }
            other => panic!("expected image, got {}", other.kind()),
        }
    }

    #[test]
    fn test_sniff_plain_values() {
        assert_eq!(Payload::sniff(&json!(4)), Payload::Json(json!(4)));
        assert_eq!(Payload::sniff(&json!("")), Payload::Json(json!("")));
        assert_eq!(
            Payload::sniff(&json!("not base64!")),
            Payload::Json(json!("not base64!"))
        );
        assert_eq!(
            Payload::sniff(&json!("aGVsbG8=")),
            Payload::Bytes(b"hello".to_vec())
        );
    }

    #[test]
    fn test_corrupt_npy_falls_back_to_bytes() {
        let mut bytes = NPY_MAGIC.to_vec();
        bytes.extend_from_slice(b"garbage");
        assert_eq!(Payload::sniff_bytes(bytes.clone()), Payload::Bytes(bytes));
    }

    #[test]
    fn test_huge_npy_shape_falls_back_to_bytes() {
        let header =
            "{'descr': '<u1', 'fortran_order': False, 'shape': (4294967296, 4294967296, 4294967296), }\n";
        let mut bytes = NPY_MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());

        let value = json!(STANDARD.encode(&bytes));
        assert_eq!(Payload::sniff(&value), Payload::Bytes(bytes));
        assert!(decode_array(&value).is_err());
    }

    #[test]
    fn test_typed_decoders_reject_wrong_shape() {
        assert!(decode_bytes(&json!(5)).is_err());
        assert!(decode_array(&json!("aGVsbG8=")).is_err());
        assert!(decode_image(&json!("aGVsbG8=")).is_err());
    }
}
