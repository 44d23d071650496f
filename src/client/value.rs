//! Values accepted by the client write operations

use bytes::Bytes;

/// Anything that can be stored as a string value
///
/// Numbers and booleans are stored in their decimal text form, the same way
/// a RESP client would send them.
pub trait StoreValue {
    fn into_store_bytes(self) -> Bytes;
}

impl StoreValue for Bytes {
    fn into_store_bytes(self) -> Bytes {
        self
    }
}

impl StoreValue for Vec<u8> {
    fn into_store_bytes(self) -> Bytes {
        Bytes::from(self)
    }
}

impl StoreValue for &[u8] {
    fn into_store_bytes(self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl StoreValue for String {
    fn into_store_bytes(self) -> Bytes {
        Bytes::from(self)
    }
}

impl StoreValue for &str {
    fn into_store_bytes(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl StoreValue for &String {
    fn into_store_bytes(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

macro_rules! display_value {
    ($($t:ty),*) => {
        $(
            impl StoreValue for $t {
                fn into_store_bytes(self) -> Bytes {
                    Bytes::from(self.to_string())
                }
            }
        )*
    };
}

display_value!(i32, i64, u32, u64, usize, f64, bool);
