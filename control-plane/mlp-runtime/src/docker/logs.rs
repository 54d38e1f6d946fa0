/// Decode a Docker log stream.
///
/// Non-TTY containers prefix every chunk with an 8 byte header
/// (`[stream, 0, 0, 0, len_be32]`). TTY containers send raw bytes.
pub fn demux_log_stream(raw: &[u8]) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let mut rest = raw;
    while !rest.is_empty() {
        let framed = rest.len() >= 8
            && matches!(rest[0], 0..=2)
            && rest[1..4] == [0, 0, 0];
        if !framed {
            out.extend_from_slice(rest);
            break;
        }
        let len = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let end = (8 + len).min(rest.len());
        out.extend_from_slice(&rest[8..end]);
        rest = &rest[end..];
    }
    String::from_utf8_lossy(&out).into_owned()
}
