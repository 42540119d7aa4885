// Copyright (c) 2025 xmpp-session contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::env::args;
use std::process::exit;
use std::rc::Rc;
use std::str::FromStr;

use tokio::sync::mpsc;
use xmpp_session::connect::TcpTransport;
use xmpp_session::jid::Jid;
use xmpp_session::parsers::message::{Body, Message, MessageType};
use xmpp_session::parsers::presence::{Presence, Show as PresenceShow, Type as PresenceType};
use xmpp_session::timer::TokioTimerFactory;
use xmpp_session::{Client, ClientEvent, ClientOptions};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::init();

    let args: Vec<String> = args().collect();
    if args.len() != 3 {
        println!("Usage: {} <jid> <password>", args[0]);
        exit(1);
    }
    let jid = Jid::from_str(&args[1]).unwrap_or_else(|e| {
        println!("Invalid JID {}: {}", args[1], e);
        exit(1);
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut client = Client::new(
        jid.clone(),
        Some(args[2].clone()),
        ClientOptions::default(),
        Rc::new(TokioTimerFactory::new(tx.clone())),
    );
    client.on_disconnected(|error| println!("Disconnected: {:?}", error));

    let addr = format!("{}:5222", jid.domain());
    let transport = match TcpTransport::connect(addr.as_str(), tx).await {
        Ok(transport) => transport,
        Err(e) => {
            println!("Could not connect to {}: {}", addr, e);
            exit(1);
        }
    };
    client.connect(transport).unwrap();

    // Main loop, feeds the client and processes its events
    while let Some(input) = rx.recv().await {
        client.handle_input(input);
        while let Some(event) = client.poll_event() {
            println!("event: {:?}", event);
            match event {
                ClientEvent::Connected { bound_jid } => {
                    println!("Online at {}", bound_jid);
                    client.send_presence(make_presence()).unwrap();
                }
                ClientEvent::Disconnected(_) => return,
                event => {
                    let Some(message) = event
                        .into_stanza()
                        .and_then(|stanza| Message::try_from(stanza).ok())
                    else {
                        continue;
                    };
                    match (message.from, message.bodies.get("")) {
                        (Some(ref from), Some(ref body)) if body.0 == "die" => {
                            println!("Secret die command triggered by {}", from);
                            client.disconnect();
                        }
                        (Some(ref from), Some(ref body)) => {
                            if message.type_ != MessageType::Error {
                                // This is a message we'll echo
                                let reply = make_reply(from.clone(), &body.0);
                                client.send_message(reply).unwrap();
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

// Construct a <presence/>
fn make_presence() -> Presence {
    let mut presence = Presence::new(PresenceType::None);
    presence.show = Some(PresenceShow::Chat);
    presence
        .statuses
        .insert(String::from("en"), String::from("Echoing messages."));
    presence
}

// Construct a chat <message/>
fn make_reply(to: Jid, body: &str) -> Message {
    let mut message = Message::new(Some(to));
    message.type_ = MessageType::Chat;
    message.bodies.insert(String::new(), Body(body.to_owned()));
    message
}
