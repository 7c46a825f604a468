use url::Url;

/// Derives the signaling WebSocket URL from a configured cloud base URL by
/// swapping the scheme (`http(s)` -> `ws(s)`), appending the fixed
/// `/edge/websocket` path, and tagging the connection with query
/// parameters identifying this edge.
pub fn build(base: &Url, edge_id: &str, local_host: &str, local_port: u16) -> Url {
    let mut url = base.clone();

    let scheme = match url.scheme() {
        "https" => "wss",
        _ => "ws",
    };
    let _ = url.set_scheme(scheme);

    {
        let mut segments = url.path_segments_mut().unwrap_or_else(|()| unreachable!());
        segments.pop_if_empty();
        segments.push("edge");
        segments.push("websocket");
    }

    {
        let mut query = url.query_pairs_mut();
        query.clear();
        query.append_pair("id", edge_id);
        query.append_pair("host", local_host);
        query.append_pair("port", &local_port.to_string());
        query.append_pair("os", std::env::consts::OS);
    }

    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_scheme_and_appends_path() {
        let base = Url::parse("https://cloud.example.com").unwrap();

        let ws = build(&base, "edge-1", "127.0.0.1", 3030);

        assert_eq!(ws.scheme(), "wss");
        assert_eq!(ws.path(), "/edge/websocket");
        assert!(ws.query().unwrap().contains("id=edge-1"));
    }

    #[test]
    fn plain_http_becomes_plain_ws() {
        let base = Url::parse("http://cloud.local:4000").unwrap();

        let ws = build(&base, "edge-1", "127.0.0.1", 3030);

        assert_eq!(ws.scheme(), "ws");
    }
}
