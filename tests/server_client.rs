//! End-to-end tests: real sockets, the pooled server and both clients.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use mono_http::client::{AsyncClient, Client};
use mono_http::protocol::{Response, Status, StatusCode};
use mono_http::{Request, Server, Uri};

fn hello_handler(request: &mut Request, status: Status) -> Response {
    if status.is_error() {
        return Response::from_status(status, request.protocol.clone());
    }
    let mut response = Response::new(request.protocol.clone());
    response.body.start_output("text/plain");
    response.body.write_all(b"Hello world!\n").unwrap();
    response
}

fn started_server<H: mono_http::Handler>(server: Server<H>) -> (Arc<Server<H>>, u16) {
    let server = Arc::new(server);
    server.start().expect("server should start");
    let port = server.listen_address().port;
    assert_ne!(port, 0);
    (server, port)
}

#[test]
fn hello_round_trip() {
    let (server, port) = started_server(Server::new("127.0.0.1:0", hello_handler));

    let client = Client::new();
    let mut response =
        client.query(Request::get(format!("http://127.0.0.1:{port}/").as_str())).unwrap();

    assert_eq!(response.status.code, 200);
    assert_eq!(&response.body.read_all()[..], b"Hello world!\n");
    assert_eq!(response.headers.get_or("Connection", ""), "close");

    server.stop();
    assert!(!server.running());
}

#[test]
fn suggested_errors_reach_the_handler() {
    let (server, port) = started_server(Server::new("127.0.0.1:0", hello_handler));

    // no Content-Length on a request with a body: 411 comes back
    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.write_all(b"POST /u HTTP/1.1\r\nHost: x\r\n\r\nabc").unwrap();
    let mut reply = String::new();
    stream.read_to_string(&mut reply).unwrap();

    assert!(reply.starts_with("HTTP/1.1 411 Length Required\r\n"), "got: {reply}");
    server.stop();
}

#[test]
fn handler_panics_become_500() {
    let panicking = |_request: &mut Request, _status: Status| -> Response {
        panic!("handler exploded");
    };
    let (server, port) = started_server(Server::new("127.0.0.1:0", panicking));

    let client = Client::new();
    let response = client.query(Request::get(format!("http://127.0.0.1:{port}/").as_str()));
    let response = response.unwrap();
    assert_eq!(response.status.code, 500);

    server.stop();
}

#[test]
fn pooled_server_completes_rapid_connections() {
    let (server, port) =
        started_server(Server::new("127.0.0.1:0", hello_handler).with_pool(2));
    assert_eq!(server.pool_size(), Some(2));

    let mut clients = Vec::new();
    for _ in 0..5 {
        clients.push(std::thread::spawn(move || {
            let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
            stream.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
            let mut reply = String::new();
            stream.read_to_string(&mut reply).unwrap();
            reply
        }));
    }

    for client in clients {
        let reply = client.join().unwrap();
        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"), "got: {reply}");
        assert!(reply.ends_with("Hello world!\n"));
    }

    // all queued connections are done, wait() must return promptly
    server.wait();
    server.stop();
}

#[test]
fn pool_can_be_resized_between_bursts() {
    let (server, port) =
        started_server(Server::new("127.0.0.1:0", hello_handler).with_pool(1));

    let query = || {
        let client = Client::new();
        let mut response =
            client.query(Request::get(format!("http://127.0.0.1:{port}/").as_str())).unwrap();
        assert_eq!(&response.body.read_all()[..], b"Hello world!\n");
    };

    query();
    server.resize_pool(3);
    assert_eq!(server.pool_size(), Some(3));
    query();

    server.stop();
}

#[test]
#[should_panic(expected = "pool size must be positive")]
fn pool_size_zero_is_a_programming_error() {
    let server = Server::new("127.0.0.1:0", hello_handler).with_pool(1);
    server.resize_pool(0);
}

#[test]
fn expect_continue_interim_flow() {
    let echoing = |request: &mut Request, status: Status| -> Response {
        if status == StatusCode::Continue {
            return Response::from_status(StatusCode::Continue, request.protocol.clone());
        }
        let mut response = Response::new(request.protocol.clone());
        response.body.start_output("text/plain");
        response.body.write_all(&request.body.read_all()).unwrap();
        response
    };
    let (server, port) = started_server(Server::new("127.0.0.1:0", echoing));

    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream
        .write_all(b"POST /u HTTP/1.1\r\nHost: x\r\nContent-Length: 3\r\nExpect: 100-continue\r\n\r\n")
        .unwrap();

    let mut interim = [0u8; 25];
    stream.read_exact(&mut interim).unwrap();
    assert_eq!(&interim, b"HTTP/1.1 100 Continue\r\n\r\n");

    stream.write_all(b"abc").unwrap();
    let mut reply = String::new();
    stream.read_to_string(&mut reply).unwrap();
    assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(reply.ends_with("abc"), "got: {reply}");

    server.stop();
}

#[test]
fn redirects_are_followed_up_to_the_limit() {
    let redirecting = |request: &mut Request, _status: Status| -> Response {
        if request.uri.path.segments() == ["old"] {
            Response::redirect(&Uri::parse("/new"), request.protocol.clone())
        } else {
            let mut response = Response::new(request.protocol.clone());
            response.body.start_output("text/plain");
            response.body.write_all(b"moved in").unwrap();
            response
        }
    };
    let (server, port) = started_server(Server::new("127.0.0.1:0", redirecting));
    let target = format!("http://127.0.0.1:{port}/old");

    // without redirects the 302 surfaces verbatim
    let client = Client::new();
    let response = client.query(Request::get(target.as_str())).unwrap();
    assert_eq!(response.status.code, 302);
    assert_eq!(response.headers.get_or("Location", ""), "/new");

    let mut client = Client::new();
    client.set_max_redirects(2);
    let mut response = client.query(Request::get(target.as_str())).unwrap();
    assert_eq!(response.status.code, 200);
    assert_eq!(&response.body.read_all()[..], b"moved in");

    server.stop();
}

#[test]
fn client_timeout_surfaces_as_timeout() {
    let sleepy = |request: &mut Request, _status: Status| -> Response {
        std::thread::sleep(Duration::from_millis(1500));
        Response::new(request.protocol.clone())
    };
    let (server, port) = started_server(Server::new("127.0.0.1:0", sleepy));

    let mut client = Client::new();
    client.set_timeout(Duration::from_millis(100));
    let error =
        client.query(Request::get(format!("http://127.0.0.1:{port}/").as_str())).unwrap_err();
    assert!(error.is_timeout(), "got: {error}");

    server.stop();
}

#[test]
fn async_client_delivers_on_the_worker_thread() {
    let (server, port) = started_server(Server::new("127.0.0.1:0", hello_handler));

    let async_client = AsyncClient::new(Client::new());
    async_client.start();
    assert!(async_client.started());

    let (sender, receiver) = mpsc::channel();
    async_client.async_query(
        Request::get(format!("http://127.0.0.1:{port}/").as_str()),
        move |_request, mut response| {
            let body = response.body.read_all();
            sender.send((response.status.code, body)).unwrap();
        },
    );

    let (code, body) = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(code, 200);
    assert_eq!(&body[..], b"Hello world!\n");

    async_client.stop();
    assert!(!async_client.started());
    server.stop();
}

#[test]
fn async_client_reports_connect_errors() {
    let async_client = AsyncClient::new(Client::new());
    async_client.start();

    let (sender, receiver) = mpsc::channel();
    let errors = sender.clone();
    async_client.async_query_with(
        // closed port: nobody is listening
        Request::get("http://127.0.0.1:9/"),
        move |_request, _response| {
            sender.send(None).unwrap();
        },
        |_request| {},
        move |_request, status| {
            errors.send(Some(status)).unwrap();
        },
    );

    let outcome = receiver.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(outcome.is_some(), "expected a connect error");
    async_client.stop();
}

#[test]
fn post_fields_round_trip_through_format_post() {
    let form_reader = |request: &mut Request, _status: Status| -> Response {
        let parsed = request.parse_post();
        let mut response = Response::new(request.protocol.clone());
        response.body.start_output("text/plain");
        if parsed {
            write!(response.body, "f={}", request.post.get_or("f", "?")).unwrap();
        } else {
            write!(response.body, "unparsed").unwrap();
        }
        response
    };
    let (server, port) = started_server(Server::new("127.0.0.1:0", form_reader));

    let client = Client::new();
    let mut request = Request::new(
        "POST",
        format!("http://127.0.0.1:{port}/submit").as_str(),
        mono_http::protocol::Protocol::http_1_1(),
    );
    request.post.append("f", "value with spaces");

    let mut response = client.query(request).unwrap();
    assert_eq!(&response.body.read_all()[..], b"f=value with spaces");

    server.stop();
}
