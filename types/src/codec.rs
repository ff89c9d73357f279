use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, ReadExt, Write};
use commonware_cryptography::ed25519::PublicKey;

/// Maximum length of a rejection message carried in an event.
pub const MAX_MESSAGE_LENGTH: usize = 256;

/// Helper to write a string as length-prefixed UTF-8 bytes.
pub fn write_string(s: &str, writer: &mut impl BufMut) {
    let bytes = s.as_bytes();
    (bytes.len() as u32).write(writer);
    writer.put_slice(bytes);
}

/// Helper to read a string from length-prefixed UTF-8 bytes.
pub fn read_string(reader: &mut impl Buf, max_len: usize) -> Result<String, Error> {
    let len = u32::read(reader)? as usize;
    if len > max_len {
        return Err(Error::Invalid("String", "too long"));
    }
    if reader.remaining() < len {
        return Err(Error::EndOfBuffer);
    }
    let mut bytes = vec![0u8; len];
    reader.copy_to_slice(&mut bytes);
    String::from_utf8(bytes).map_err(|_| Error::Invalid("String", "invalid UTF-8"))
}

/// Helper to get encode size of a string.
pub fn string_encode_size(s: &str) -> usize {
    4 + s.len()
}

/// Optional public keys are written as a presence flag followed by the key.
pub fn write_optional_key(key: &Option<PublicKey>, writer: &mut impl BufMut) {
    match key {
        Some(key) => {
            true.write(writer);
            key.write(writer);
        }
        None => false.write(writer),
    }
}

pub fn read_optional_key(reader: &mut impl Buf) -> Result<Option<PublicKey>, Error> {
    if bool::read(reader)? {
        Ok(Some(PublicKey::read(reader)?))
    } else {
        Ok(None)
    }
}

pub fn optional_key_encode_size(key: &Option<PublicKey>) -> usize {
    1 + key.as_ref().map(|key| key.encode_size()).unwrap_or(0)
}

/// Optional timestamps use the same presence-flag layout as optional keys.
pub fn write_optional_u64(value: &Option<u64>, writer: &mut impl BufMut) {
    match value {
        Some(value) => {
            true.write(writer);
            value.write(writer);
        }
        None => false.write(writer),
    }
}

pub fn read_optional_u64(reader: &mut impl Buf) -> Result<Option<u64>, Error> {
    if bool::read(reader)? {
        Ok(Some(u64::read(reader)?))
    } else {
        Ok(None)
    }
}

pub fn optional_u64_encode_size(value: &Option<u64>) -> usize {
    1 + value.as_ref().map(|value| value.encode_size()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use commonware_cryptography::{ed25519::PrivateKey, Signer};
    use rand::{rngs::StdRng, RngCore, SeedableRng};

    #[test]
    fn read_string_rejects_too_long() {
        let mut buf = BytesMut::new();
        (5u32).write(&mut buf);
        buf.extend_from_slice(b"hello");

        let mut reader = buf.as_ref();
        let err = read_string(&mut reader, 4).expect_err("should reject too-long string");
        assert!(matches!(err, Error::Invalid("String", "too long")));
    }

    #[test]
    fn read_string_rejects_truncated_buffers() {
        let mut buf = BytesMut::new();
        (3u32).write(&mut buf);
        buf.extend_from_slice(b"ab");

        let mut reader = buf.as_ref();
        let err = read_string(&mut reader, 10).expect_err("should reject truncated buffer");
        assert!(matches!(err, Error::EndOfBuffer));
    }

    #[test]
    fn read_string_rejects_invalid_utf8() {
        let mut buf = BytesMut::new();
        (2u32).write(&mut buf);
        buf.extend_from_slice(&[0xff, 0xff]);

        let mut reader = buf.as_ref();
        let err = read_string(&mut reader, 10).expect_err("should reject invalid UTF-8");
        assert!(matches!(err, Error::Invalid("String", "invalid UTF-8")));
    }

    #[test]
    fn read_string_handles_malformed_inputs() {
        let mut rng = StdRng::seed_from_u64(0x5eed_c0de);
        let max_len = 64;

        for _ in 0..500 {
            let len = (rng.next_u32() as usize) % 512;
            let mut buf = vec![0u8; len];
            rng.fill_bytes(&mut buf);
            let mut reader = buf.as_slice();
            if let Ok(s) = read_string(&mut reader, max_len) {
                assert!(s.len() <= max_len);
            }
        }
    }

    #[test]
    fn optional_key_layout_matches_encode_size() {
        let key = Some(PrivateKey::from_seed(7).public_key());
        for value in [None, key] {
            let mut buf = BytesMut::new();
            write_optional_key(&value, &mut buf);
            assert_eq!(buf.len(), optional_key_encode_size(&value));

            let mut reader = buf.as_ref();
            assert_eq!(read_optional_key(&mut reader).unwrap(), value);
            assert!(reader.is_empty());
        }
    }

    #[test]
    fn optional_key_rejects_missing_key_bytes() {
        let mut buf = BytesMut::new();
        true.write(&mut buf);
        let mut reader = buf.as_ref();
        assert!(read_optional_key(&mut reader).is_err());
    }
}
