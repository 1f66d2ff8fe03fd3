use neura_webdialog::{ClientBuilder, Error, Page};
use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const MAIN_MENU: &str = r#"<html><head><meta http-equiv="Content-Type" content="text/html; charset=windows-1252"></head>
<body><form action="schema.jsp" method="post"><input type="hidden" name="SESSIONID" value="F00D"></form></body></html>"#;

const LOGIN_FORM: &str = r#"<html><body><form action="mainmenu.jsp" method="post">
<input name="USER"><input name="PASSWORD" type="password"><input type="submit" name="loginButton" value="LOGIN">
</form></body></html>"#;

const SCHEMA: &str = r#"<html><body><span id="flow" value="34.5°C"></span><span id="heatpump_2" value="ON"></span></body></html>"#;

#[derive(Debug)]
struct Request {
    method: String,
    path: String,
    cookie: Option<String>,
    body: String,
}

async fn read_request(stream: &mut TcpStream) -> Request {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed mid-request");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8(buf[..header_end].to_vec()).unwrap();
    let mut lines = head.lines();
    let mut request_line = lines.next().unwrap().split(' ');
    let method = request_line.next().unwrap().to_owned();
    let path = request_line.next().unwrap().to_owned();

    let mut content_length = 0;
    let mut cookie = None;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            match name.to_ascii_lowercase().as_str() {
                "content-length" => content_length = value.trim().parse().unwrap(),
                "cookie" => cookie = Some(value.trim().to_owned()),
                _ => {}
            }
        }
    }

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed mid-body");
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8(buf[header_end..header_end + content_length].to_vec()).unwrap();

    Request {
        method,
        path,
        cookie,
        body,
    }
}

async fn respond(stream: &mut TcpStream, status: &str, extra_headers: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=windows-1252\r\nContent-Length: {}\r\nConnection: close\r\n{}\r\n{}",
        status,
        body.len(),
        extra_headers,
        body
    );
    stream.write_all(response.as_bytes()).await.unwrap();
    stream.shutdown().await.unwrap();
}

/// Serves a fake WebDialog controller which accepts `user`/`secret` and answers `schema.jsp` only for the session it
/// handed out. Returns the base URL and a handle yielding every request it saw.
async fn controller(requests: usize) -> (String, tokio::task::JoinHandle<Vec<Request>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}/neura/mobile/jsp/", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let mut seen = Vec::new();
        for _ in 0..requests {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;

            match (request.method.as_str(), request.path.as_str()) {
                ("GET", "/neura/mobile/jsp/login.jsp") => {
                    respond(&mut stream, "200 OK", "Set-Cookie: JSESSIONID=c00kie; Path=/\r\n", LOGIN_FORM).await
                }
                ("POST", "/neura/mobile/jsp/mainmenu.jsp") => {
                    let body = if request.body == "USER=user&PASSWORD=secret&loginButton=LOGIN" {
                        MAIN_MENU
                    } else {
                        LOGIN_FORM
                    };
                    respond(&mut stream, "200 OK", "", body).await
                }
                ("POST", "/neura/mobile/jsp/schema.jsp") if request.body == "SESSIONID=F00D" => {
                    respond(&mut stream, "200 OK", "", SCHEMA).await
                }
                _ => respond(&mut stream, "500 Internal Server Error", "", "").await,
            }
            seen.push(request);
        }
        seen
    });

    (base, handle)
}

#[tokio::test]
async fn login_and_fetch_page() {
    let (base, server) = controller(3).await;
    let client = ClientBuilder::new(base)
        .credentials("user", "secret")
        .build()
        .unwrap();

    let session = client.login().await.unwrap();
    assert_eq!(session.as_str(), "F00D");

    let url = client.page_url("schema.jsp").unwrap();
    let body = client.fetch(&url, &session).await.unwrap();
    let page = Page::parse(&body);
    assert_eq!(page.element_value("flow").unwrap(), "34.5°C");
    assert_eq!(page.element_value("heatpump_2").unwrap(), "ON");

    let requests = server.await.unwrap();
    assert_eq!(requests[0].cookie, None);
    assert_eq!(requests[1].cookie.as_deref(), Some("JSESSIONID=c00kie"));
}

#[tokio::test]
async fn login_with_bad_credentials() {
    let (base, server) = controller(2).await;
    let client = ClientBuilder::new(base)
        .credentials("user", "wrong")
        .build()
        .unwrap();

    assert!(matches!(client.login().await, Err(Error::NoSession)));
    server.await.unwrap();
}

#[tokio::test]
async fn fetch_with_stale_session() {
    let (base, server) = controller(1).await;
    let client = ClientBuilder::new(base).build().unwrap();

    let url = client.page_url("schema.jsp").unwrap();
    let result = client.fetch(&url, &"DEAD".into()).await;
    assert!(matches!(
        result,
        Err(Error::Status { status, .. }) if status.as_u16() == 500
    ));
    server.await.unwrap();
}

#[tokio::test]
async fn login_against_unreachable_controller() {
    // Bind and immediately drop to get a port nothing listens on.
    let addr = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();
    let client = ClientBuilder::new(addr.to_string()).build().unwrap();

    assert!(matches!(client.login().await, Err(Error::HttpErr(_))));
}
