//! Parse raw HTTP response header lines.

/// Status code and `Name: value` pairs of the last header block.
///
/// With redirects followed, curl reports one block per hop; each `HTTP/` status
/// line starts a new block and discards the previous one.
pub(crate) fn parse_header_block(lines: &[String]) -> (Option<u32>, Vec<(String, String)>) {
    let mut status = None;
    let mut headers = Vec::new();

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with("HTTP/") {
            status = parse_status_line(line);
            headers.clear();
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    (status, headers)
}

/// "HTTP/1.1 404 Not Found" -> 404.
fn parse_status_line(line: &str) -> Option<u32> {
    line.split_whitespace().nth(1)?.parse().ok()
}
