//! Echo server on an ephemeral localhost port with a recording handler.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use wsgate::{AdmissionController, Callbacks, Server, ServerConfig, ShutdownHandle};

type EventLog = Arc<Mutex<Vec<String>>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub admission: Arc<AdmissionController>,
    events: EventLog,
    shutdown: ShutdownHandle,
    task: JoinHandle<Server>,
}

fn recording_callbacks(events: &EventLog) -> Callbacks {
    let (connect, message, binary, disconnect, error) = (
        events.clone(),
        events.clone(),
        events.clone(),
        events.clone(),
        events.clone(),
    );
    Callbacks::new()
        .on_connect(move |ip| connect.lock().unwrap().push(format!("connect {ip}")))
        .on_message(move |ip, text| {
            message.lock().unwrap().push(format!("message {ip} {text}"));
            Some(format!("Echo: {text}"))
        })
        .on_binary(move |ip, data| {
            binary.lock().unwrap().push(format!("binary {ip} {}", data.len()));
            Some(data.to_vec())
        })
        .on_disconnect(move |ip| disconnect.lock().unwrap().push(format!("disconnect {ip}")))
        .on_error(move |ip, e| error.lock().unwrap().push(format!("error {ip} {:?}", e.kind())))
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_with(ServerConfig::default()).await
    }

    pub async fn spawn_with(config: ServerConfig) -> Self {
        let mut server =
            Server::with_config(config.with_bind_address("127.0.0.1").with_port(0));
        let events = EventLog::default();
        server.set_handler(recording_callbacks(&events)).unwrap();
        server.start().unwrap();

        let addr = server.local_addr().unwrap();
        let admission = server.admission().cloned().unwrap();
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(async move {
            server.run().await.unwrap();
            server
        });
        Self {
            addr,
            admission,
            events,
            shutdown,
            task,
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Poll the event log until `done` holds, panicking after five seconds.
    pub async fn wait_for(&self, done: impl Fn(&[String]) -> bool) -> Vec<String> {
        let poll = async {
            loop {
                let events = self.events();
                if done(&events) {
                    return events;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        match tokio::time::timeout(Duration::from_secs(5), poll).await {
            Ok(events) => events,
            Err(_) => panic!("timed out waiting for events: {:?}", self.events()),
        }
    }

    pub async fn wait_for_event(&self, event: &str) -> Vec<String> {
        self.wait_for(|events| events.iter().any(|e| e == event)).await
    }

    /// Stop the server, returning it once every connection has closed.
    pub async fn shutdown(self) -> Server {
        self.shutdown.shutdown();
        self.task.await.unwrap()
    }
}
