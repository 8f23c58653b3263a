use embercore::{Action, Handler, PostEventKind, PostProcessor, Request, Response, Server, StatusCode};
use std::fmt::Write as _;
use tokio::net::TcpListener;

struct MyHandler;

impl Handler for MyHandler {
    async fn handle(&self, _: &mut (), req: &Request, resp: &mut Response) -> Action {
        let Some(content_type) = req.header(b"content-type") else {
            let handled = resp
                .status(StatusCode::BadRequest)
                .body(r#"{"error": "missing Content-Type"}"#);
            return Action::respond(handled);
        };

        let mut proc = match PostProcessor::new(content_type, 256) {
            Ok(proc) => proc,
            Err(err) => {
                let handled = resp
                    .status(StatusCode::UnsupportedMediaType)
                    .body(format!(r#"{{"error": "{err}"}}"#));
                return Action::respond(handled);
            }
        };

        let body = req.body().unwrap_or(&[]);
        let mut out = String::from("[");
        let mut first = true;
        let mut collect = |ev: embercore::PostEvent<'_>| {
            if ev.size == 0 {
                return;
            }
            if !first {
                out.push(',');
            }
            first = false;
            let kind = match ev.kind {
                PostEventKind::Field => "field",
                PostEventKind::File => "file",
            };
            let key = String::from_utf8_lossy(ev.key);
            let data = String::from_utf8_lossy(ev.data);
            let _ = write!(out, r#"{{"kind": "{kind}", "key": {key:?}, "data": {data:?}"#);
            if let Some(filename) = ev.filename {
                let _ = write!(out, r#", "filename": {:?}"#, String::from_utf8_lossy(filename));
            }
            out.push('}');
        };

        if let Err(err) = proc.feed(body, &mut collect) {
            let handled = resp
                .status(StatusCode::PayloadTooLarge)
                .body(format!(r#"{{"error": "{err}"}}"#));
            return Action::respond(handled);
        }
        if let Err(err) = proc.finish(body, &mut collect) {
            let handled = resp
                .status(StatusCode::BadRequest)
                .body(format!(r#"{{"error": "{err}"}}"#));
            return Action::respond(handled);
        }
        out.push(']');

        let handled = resp
            .status(StatusCode::Ok)
            .header("Content-Type", "application/json")
            .body(out);
        Action::respond(handled)
    }
}

#[tokio::main]
async fn main() {
    Server::builder()
        .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
        .handler(MyHandler)
        .build()
        .launch()
        .await;
}
