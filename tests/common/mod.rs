#![allow(dead_code)]

use std::collections::BTreeSet;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

pub const USER: &str = "bob";
pub const PASSWORD: &str = "secret";

#[derive(Clone, Debug)]
pub struct Message {
    pub uid: String,
    pub raw: String,
}

pub fn message(uid: &str, from: &str, date: &str, message_id: &str, subject: &str) -> Message {
    Message {
        uid: uid.to_string(),
        raw: format!(
            "From: {}\r\nTo: {}@example.com\r\nDate: {}\r\nMessage-ID: {}\r\nSubject: {}\r\n\r\n\
             Hi,\r\n.hidden behind a dot\r\n\r\nBye.\r\n",
            from, USER, date, message_id, subject
        ),
    }
}

/// An in-memory maildrop served over plain TCP on a local port.
#[derive(Clone)]
pub struct Server {
    messages: Arc<Mutex<Vec<Message>>>,
    log: Arc<Mutex<Vec<String>>>,
    uidl: bool,
}

impl Server {
    pub fn new(messages: Vec<Message>) -> Self {
        Server {
            messages: Arc::new(Mutex::new(messages)),
            log: Arc::new(Mutex::new(Vec::new())),
            uidl: true,
        }
    }

    pub fn without_uidl(mut self) -> Self {
        self.uidl = false;
        self
    }

    /// Serve `sessions` connections one after the other.
    pub fn spawn(&self, sessions: usize) -> (u16, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = self.clone();
        let handle = thread::spawn(move || {
            for _ in 0..sessions {
                let (stream, _) = listener.accept().unwrap();
                let _ = server.serve(stream);
            }
        });
        (port, handle)
    }

    pub fn uids(&self) -> Vec<String> {
        let messages = self.messages.lock().unwrap();
        messages.iter().map(|m| m.uid.clone()).collect()
    }

    /// Every command received, passwords included.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn serve(&self, stream: TcpStream) -> io::Result<()> {
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut out = stream;
        out.write_all(b"+OK POP3 test server ready\r\n")?;

        let mut deleted = BTreeSet::new();
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Ok(());
            }
            let command = line.trim_end().to_string();
            self.log.lock().unwrap().push(command.clone());

            let mut parts = command.split(' ');
            let verb = parts.next().unwrap_or("").to_ascii_uppercase();
            let arg: Option<usize> = parts.next().and_then(|a| a.parse().ok());
            let messages = self.messages.lock().unwrap().clone();
            let live: Vec<(usize, &Message)> = (1..)
                .zip(messages.iter())
                .filter(|(i, _)| !deleted.contains(i))
                .collect();
            let get = |n: Option<usize>| {
                n.and_then(|n| live.iter().find(|(i, _)| *i == n))
                    .map(|(_, m)| *m)
            };

            let reply = match verb.as_str() {
                "USER" => "+OK\r\n".to_string(),
                "PASS" if command == format!("PASS {}", PASSWORD) => {
                    "+OK maildrop locked\r\n".to_string()
                }
                "PASS" => "-ERR invalid password\r\n".to_string(),
                "STAT" => {
                    let size: usize = live.iter().map(|(_, m)| m.raw.len()).sum();
                    format!("+OK {} {}\r\n", live.len(), size)
                }
                "UIDL" if self.uidl => listing(live.iter().map(|(i, m)| (*i, m.uid.clone()))),
                "LIST" => listing(live.iter().map(|(i, m)| (*i, m.raw.len().to_string()))),
                "TOP" => match get(arg) {
                    Some(m) => {
                        let end = m.raw.find("\r\n\r\n").map_or(m.raw.len(), |i| i + 4);
                        multiline(&m.raw[..end])
                    }
                    None => "-ERR no such message\r\n".to_string(),
                },
                "RETR" => match get(arg) {
                    Some(m) => multiline(&m.raw),
                    None => "-ERR no such message\r\n".to_string(),
                },
                "DELE" => match arg.filter(|_| get(arg).is_some()) {
                    Some(n) => {
                        deleted.insert(n);
                        format!("+OK message {} deleted\r\n", n)
                    }
                    None => "-ERR no such message\r\n".to_string(),
                },
                "NOOP" => "+OK\r\n".to_string(),
                "RSET" => {
                    deleted.clear();
                    "+OK\r\n".to_string()
                }
                "QUIT" => {
                    let mut messages = self.messages.lock().unwrap();
                    for n in deleted.iter().rev() {
                        messages.remove(n - 1);
                    }
                    out.write_all(b"+OK bye\r\n")?;
                    return Ok(());
                }
                _ => "-ERR unknown command\r\n".to_string(),
            };
            out.write_all(reply.as_bytes())?;
        }
    }
}

fn listing<I: Iterator<Item = (usize, String)>>(entries: I) -> String {
    let mut out = String::from("+OK\r\n");
    for (i, value) in entries {
        out.push_str(&format!("{} {}\r\n", i, value));
    }
    out.push_str(".\r\n");
    out
}

fn multiline(data: &str) -> String {
    let mut out = String::from("+OK\r\n");
    for line in data.split_inclusive("\r\n") {
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
    }
    out.push_str(".\r\n");
    out
}
