use crate::game::{ClientView, ViewUpdate};
use crate::input::{parse_line, Command, PROMPT};
use crate::rendering::Renderer;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{error, info, warn};
use shared::{Intent, ServerMessage};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct Client {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
    view: ClientView,
    renderer: Renderer,
}

impl Client {
    pub async fn connect(url: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let (ws_stream, _) = connect_async(url).await?;
        info!("Connected to {}", url);
        println!("Connected to server");

        let (write, read) = ws_stream.split();
        Ok(Client {
            write,
            read,
            view: ClientView::new(),
            renderer: Renderer::default(),
        })
    }

    pub fn view(&self) -> &ClientView {
        &self.view
    }

    pub async fn send_intent(&mut self, intent: Intent) -> Result<(), Box<dyn std::error::Error>> {
        self.write
            .send(Message::Text(intent.as_token().to_string()))
            .await?;
        Ok(())
    }

    fn handle_payload(&mut self, text: &str) {
        let message = match ServerMessage::decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Error parsing message: {}", e);
                return;
            }
        };

        match self.view.apply(message) {
            ViewUpdate::Assigned(id) => println!("Assigned Client ID: {}", id),
            ViewUpdate::Neighborhood { .. } => print!("{}", self.renderer.render(&self.view)),
        }
    }

    /// Reads commands from stdin and prints every neighborhood the server
    /// sends, until the user quits or the server goes away.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        prompt();

        loop {
            tokio::select! {
                message = self.read.next() => match message {
                    Some(Ok(Message::Text(text))) => self.handle_payload(&text),
                    Some(Ok(Message::Close(frame))) => {
                        match frame {
                            Some(frame) => println!("Disconnected from server: {}", frame.reason),
                            None => println!("Disconnected from server"),
                        }
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("Connection error: {}", e);
                        return Err(e.into());
                    }
                    None => {
                        println!("Disconnected from server");
                        return Ok(());
                    }
                },

                line = lines.next_line() => {
                    let Some(line) = line? else {
                        break;
                    };
                    for command in parse_line(&line) {
                        match command {
                            Ok(Command::Move(intent)) => self.send_intent(intent).await?,
                            Ok(Command::Quit) => {
                                self.close().await;
                                return Ok(());
                            }
                            Err(token) => println!("Invalid command: {}", token),
                        }
                    }
                    prompt();
                }
            }
        }

        self.close().await;
        Ok(())
    }

    pub async fn close(&mut self) {
        if let Err(e) = self.write.send(Message::Close(None)).await {
            warn!("Error closing connection: {}", e);
        }
    }
}

fn prompt() {
    print!("{}", PROMPT);
    let _ = std::io::stdout().flush();
}
