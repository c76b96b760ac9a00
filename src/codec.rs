//! Frame encoding for the coupling wire protocol.
//!
//! Every frame is little-endian and carries no self-describing length except
//! strings, which are prefixed with a fixed 8-byte count. Arrays rely on the
//! caller already knowing the element count out of band, matching how the
//! coupling layer above this crate tracks mesh sizes independently.
//!
//! Functions are generic over `AsyncRead`/`AsyncWrite` rather than tied to
//! `TcpStream` directly, since the facade reads and writes through a
//! connection's split halves (`OwnedReadHalf`/`OwnedWriteHalf`).

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub(crate) async fn write_i32<W: AsyncWrite + Unpin>(writer: &mut W, value: i32) -> std::io::Result<()> {
    writer.write_all(&value.to_le_bytes()).await
}

pub(crate) async fn read_i32<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).await?;
    Ok(i32::from_le_bytes(buf))
}

pub(crate) async fn write_f64<W: AsyncWrite + Unpin>(writer: &mut W, value: f64) -> std::io::Result<()> {
    writer.write_all(&value.to_le_bytes()).await
}

pub(crate) async fn read_f64<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<f64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf).await?;
    Ok(f64::from_le_bytes(buf))
}

pub(crate) async fn write_bool<W: AsyncWrite + Unpin>(writer: &mut W, value: bool) -> std::io::Result<()> {
    writer.write_all(&[value as u8]).await
}

pub(crate) async fn read_bool<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<bool> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf).await?;
    Ok(buf[0] != 0)
}

pub(crate) async fn write_i32_slice<W: AsyncWrite + Unpin>(writer: &mut W, values: &[i32]) -> std::io::Result<()> {
    let mut buf = Vec::with_capacity(values.len() * 4);
    for value in values {
        buf.extend_from_slice(&value.to_le_bytes());
    }
    writer.write_all(&buf).await
}

pub(crate) async fn read_i32_slice<R: AsyncRead + Unpin>(reader: &mut R, out: &mut [i32]) -> std::io::Result<()> {
    let mut buf = vec![0u8; out.len() * 4];
    reader.read_exact(&mut buf).await?;
    for (chunk, slot) in buf.chunks_exact(4).zip(out.iter_mut()) {
        *slot = i32::from_le_bytes(chunk.try_into().expect("chunk is exactly 4 bytes"));
    }
    Ok(())
}

pub(crate) async fn write_f64_slice<W: AsyncWrite + Unpin>(writer: &mut W, values: &[f64]) -> std::io::Result<()> {
    let mut buf = Vec::with_capacity(values.len() * 8);
    for value in values {
        buf.extend_from_slice(&value.to_le_bytes());
    }
    writer.write_all(&buf).await
}

pub(crate) async fn read_f64_slice<R: AsyncRead + Unpin>(reader: &mut R, out: &mut [f64]) -> std::io::Result<()> {
    let mut buf = vec![0u8; out.len() * 8];
    reader.read_exact(&mut buf).await?;
    for (chunk, slot) in buf.chunks_exact(8).zip(out.iter_mut()) {
        *slot = f64::from_le_bytes(chunk.try_into().expect("chunk is exactly 8 bytes"));
    }
    Ok(())
}

/// Strings are sent as a `u64` byte count (the payload length including a
/// trailing NUL) followed by that many bytes. The fixed 8-byte count is a
/// deliberate break from a raw platform `size_t`, so two peers built for
/// different word sizes still agree on the wire.
pub(crate) async fn write_string<W: AsyncWrite + Unpin>(writer: &mut W, value: &str) -> std::io::Result<()> {
    let mut bytes = Vec::with_capacity(value.len() + 1);
    bytes.extend_from_slice(value.as_bytes());
    bytes.push(0);
    writer.write_all(&(bytes.len() as u64).to_le_bytes()).await?;
    writer.write_all(&bytes).await
}

pub(crate) async fn read_string<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<String> {
    let mut len_buf = [0u8; 8];
    reader.read_exact(&mut len_buf).await?;
    let size = u64::from_le_bytes(len_buf) as usize;
    let mut buf = vec![0u8; size];
    reader.read_exact(&mut buf).await?;
    if size == 0 || buf[size - 1] != 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "string frame missing trailing NUL",
        ));
    }
    buf.truncate(size - 1);
    String::from_utf8(buf).map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let accept = listener.accept();
        let (connect, accept) = tokio::join!(connect, accept);
        (connect.unwrap(), accept.unwrap().0)
    }

    #[tokio::test]
    async fn round_trips_scalars() {
        let (mut a, mut b) = loopback_pair().await;
        write_i32(&mut a, -7).await.unwrap();
        assert_eq!(read_i32(&mut b).await.unwrap(), -7);
        write_f64(&mut a, 3.5).await.unwrap();
        assert_eq!(read_f64(&mut b).await.unwrap(), 3.5);
        write_bool(&mut a, true).await.unwrap();
        assert!(read_bool(&mut b).await.unwrap());
    }

    #[tokio::test]
    async fn round_trips_slices() {
        let (mut a, mut b) = loopback_pair().await;
        let ints = [1, 2, 3, -4];
        write_i32_slice(&mut a, &ints).await.unwrap();
        let mut out = [0i32; 4];
        read_i32_slice(&mut b, &mut out).await.unwrap();
        assert_eq!(out, ints);

        let doubles = [1.0, 2.5, -3.25];
        write_f64_slice(&mut a, &doubles).await.unwrap();
        let mut out = [0.0f64; 3];
        read_f64_slice(&mut b, &mut out).await.unwrap();
        assert_eq!(out, doubles);
    }

    #[tokio::test]
    async fn round_trips_strings_including_empty() {
        let (mut a, mut b) = loopback_pair().await;
        write_string(&mut a, "hello").await.unwrap();
        assert_eq!(read_string(&mut b).await.unwrap(), "hello");

        write_string(&mut a, "").await.unwrap();
        assert_eq!(read_string(&mut b).await.unwrap(), "");
    }
}
