use bytes::{Buf, Bytes, BytesMut};

use crate::error::{Error, Result};

/// MarshalSize returns the number of octets a value occupies once marshaled.
pub trait MarshalSize {
    fn marshal_size(&self) -> usize;
}

/// Marshal serializes a value into network byte order.
pub trait Marshal: MarshalSize {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize>;

    fn marshal(&self) -> Result<Bytes> {
        let l = self.marshal_size();
        let mut buf = BytesMut::with_capacity(l);
        buf.resize(l, 0);
        let n = self.marshal_to(&mut buf)?;
        if n != l {
            Err(Error::new(format!(
                "marshal_to output size {n}, but expect {l}"
            )))
        } else {
            Ok(buf.freeze())
        }
    }
}

/// Unmarshal parses a value out of a byte stream.
pub trait Unmarshal: MarshalSize {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf;
}
