use embercore::{Action, Handler, Request, Response, Server, StatusCode, UpgradeHandle};
use tokio::net::TcpListener;

struct MyHandler;

impl Handler for MyHandler {
    async fn handle(&self, _: &mut (), req: &Request, resp: &mut Response) -> Action {
        let wants_upgrade = req
            .header(b"upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case(b"websocket"));

        if !wants_upgrade {
            let handled = resp
                .status(StatusCode::BadRequest)
                .body("expected an Upgrade: websocket request");
            return Action::respond(handled);
        }

        let handled = resp
            .status(StatusCode::SwitchingProtocols)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .body("");
        Action::upgrade(handled)
    }

    async fn handle_upgrade(&self, _: &mut (), mut handle: UpgradeHandle) {
        let mut buf = [0u8; 4096];
        loop {
            match handle.recv(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if handle.send(&buf[..n]).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        let _ = handle.close().await;
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
