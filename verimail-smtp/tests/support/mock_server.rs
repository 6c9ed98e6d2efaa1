//! A scripted SMTP server for exercising the prober.
//!
//! Every verb gets a canned reply. RCPT TO replies can differ per connection,
//! which is how greylisting followed by acceptance is modelled.
//!
//! Without [`MockSmtpServerBuilder::with_tls`] a `220` reply to STARTTLS
//! closes the connection, so a handshake attempt always fails. With it the
//! server completes the handshake using the self-signed certificate in
//! `tests/certs` and carries on over the encrypted stream.
#![allow(dead_code)]

use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::Mutex,
    task::JoinHandle,
};
use tokio_rustls::{TlsAcceptor, rustls::ServerConfig};

const CERTIFICATE: &[u8] = include_bytes!("../certs/cert.pem");
const PRIVATE_KEY: &[u8] = include_bytes!("../certs/key.pem");

/// Builds an acceptor for the self-signed `mx.test` certificate.
fn acceptor() -> io::Result<TlsAcceptor> {
    let certs = rustls_pemfile::certs(&mut &CERTIFICATE[..]).collect::<io::Result<Vec<_>>>()?;
    let key = rustls_pemfile::private_key(&mut &PRIVATE_KEY[..])?
        .ok_or_else(|| io::Error::other("no private key in tests/certs/key.pem"))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(io::Error::other)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// A command and whether it arrived over TLS.
type Received = (SmtpCommand, bool);

/// A command as the server parsed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Helo(String),
    MailFrom(String),
    RcptTo(String),
    StartTls,
    Quit,
    Other(String),
}

impl SmtpCommand {
    fn parse(line: &str) -> Self {
        let (verb, argument) = line.split_once(' ').unwrap_or((line, ""));
        let argument = argument.to_string();

        match verb.to_ascii_uppercase().as_str() {
            "EHLO" => Self::Ehlo(argument),
            "HELO" => Self::Helo(argument),
            "MAIL" => Self::MailFrom(argument),
            "RCPT" => Self::RcptTo(argument),
            "STARTTLS" => Self::StartTls,
            "QUIT" => Self::Quit,
            _ => Self::Other(line.to_string()),
        }
    }
}

/// One reply, possibly spanning several lines.
#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    lines: Vec<String>,
}

impl Reply {
    fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![text.into()],
        }
    }

    fn render(&self) -> String {
        let last = self.lines.len().saturating_sub(1);

        self.lines
            .iter()
            .enumerate()
            .map(|(i, line)| {
                let separator = if i == last { ' ' } else { '-' };
                format!("{}{separator}{line}\r\n", self.code)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
enum Fault {
    /// Never answer the nth command (0-indexed).
    Hang(usize),
    /// Close the connection once n commands have been answered.
    Drop(usize),
}

struct Script {
    greeting: Reply,
    ehlo: Reply,
    helo: Reply,
    mail: Reply,
    /// Indexed by connection; the last entry repeats.
    rcpt: Vec<Reply>,
    starttls: Reply,
    fault: Option<Fault>,
    tls: Option<TlsAcceptor>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            greeting: Reply::new(220, "mx.test ESMTP ready"),
            ehlo: Reply {
                code: 250,
                lines: vec!["mx.test".to_string(), "8BITMIME".to_string()],
            },
            helo: Reply::new(250, "mx.test"),
            mail: Reply::new(250, "2.1.0 Sender OK"),
            rcpt: vec![Reply::new(250, "2.1.5 Recipient OK")],
            starttls: Reply::new(502, "5.5.1 Not implemented"),
            fault: None,
            tls: None,
        }
    }
}

impl Script {
    fn reply(&self, command: &SmtpCommand, connection: usize) -> Reply {
        match command {
            SmtpCommand::Ehlo(_) => self.ehlo.clone(),
            SmtpCommand::Helo(_) => self.helo.clone(),
            SmtpCommand::MailFrom(_) => self.mail.clone(),
            SmtpCommand::RcptTo(_) => {
                self.rcpt[connection.min(self.rcpt.len() - 1)].clone()
            }
            SmtpCommand::StartTls => self.starttls.clone(),
            SmtpCommand::Quit => Reply::new(221, "2.0.0 Bye"),
            SmtpCommand::Other(_) => Reply::new(500, "5.5.2 Unrecognised command"),
        }
    }

    async fn converse(
        &self,
        stream: TcpStream,
        connection: usize,
        log: &Mutex<Vec<Received>>,
    ) -> io::Result<()> {
        let mut stream = BufReader::new(stream);
        stream.write_all(self.greeting.render().as_bytes()).await?;

        let mut answered = 0;
        let Some(plain) = self
            .exchange(stream, connection, log, false, &mut answered)
            .await?
        else {
            return Ok(());
        };

        let Some(acceptor) = &self.tls else {
            return Ok(());
        };

        let secured = acceptor.accept(plain.into_inner()).await?;
        self.exchange(BufReader::new(secured), connection, log, true, &mut answered)
            .await?;

        Ok(())
    }

    /// Answers commands until the client leaves. Hands the stream back when
    /// the client has been told to start TLS.
    async fn exchange<S>(
        &self,
        mut stream: BufReader<S>,
        connection: usize,
        log: &Mutex<Vec<Received>>,
        tls: bool,
        answered: &mut usize,
    ) -> io::Result<Option<BufReader<S>>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut line = String::new();

        loop {
            match self.fault {
                Some(Fault::Hang(n)) if n == *answered => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    return Ok(None);
                }
                Some(Fault::Drop(n)) if n == *answered => return Ok(None),
                _ => {}
            }

            line.clear();
            if stream.read_line(&mut line).await? == 0 {
                return Ok(None);
            }
            *answered += 1;

            let command = SmtpCommand::parse(line.trim());
            let reply = self.reply(&command, connection);
            log.lock().await.push((command.clone(), tls));

            stream.write_all(reply.render().as_bytes()).await?;
            stream.flush().await?;

            match command {
                SmtpCommand::Quit => return Ok(None),
                SmtpCommand::StartTls if reply.code == 220 && !tls => return Ok(Some(stream)),
                _ => {}
            }
        }
    }
}

pub struct MockSmtpServer {
    addr: SocketAddr,
    log: Arc<Mutex<Vec<Received>>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder::default()
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Commands received so far, across every connection.
    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.log
            .lock()
            .await
            .iter()
            .map(|(command, _)| command.clone())
            .collect()
    }

    /// Commands received after a completed TLS handshake.
    pub async fn commands_over_tls(&self) -> Vec<SmtpCommand> {
        self.log
            .lock()
            .await
            .iter()
            .filter(|(_, tls)| *tls)
            .map(|(command, _)| command.clone())
            .collect()
    }

    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for MockSmtpServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Default)]
pub struct MockSmtpServerBuilder {
    script: Script,
    tls: bool,
}

impl MockSmtpServerBuilder {
    #[must_use]
    pub fn with_greeting(mut self, code: u16, text: impl Into<String>) -> Self {
        self.script.greeting = Reply::new(code, text);
        self
    }

    /// The first line is the server's name, the rest are capabilities.
    #[must_use]
    pub fn with_ehlo_response(mut self, code: u16, lines: Vec<String>) -> Self {
        self.script.ehlo = Reply { code, lines };
        self
    }

    #[must_use]
    pub fn advertising_starttls(mut self) -> Self {
        self.script.ehlo.lines.push("STARTTLS".to_string());
        self
    }

    #[must_use]
    pub fn with_helo_response(mut self, code: u16, text: impl Into<String>) -> Self {
        self.script.helo = Reply::new(code, text);
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, text: impl Into<String>) -> Self {
        self.script.mail = Reply::new(code, text);
        self
    }

    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, text: impl Into<String>) -> Self {
        self.script.rcpt = vec![Reply::new(code, text)];
        self
    }

    /// One RCPT TO reply per connection, in order; the last one repeats.
    #[must_use]
    pub fn with_rcpt_to_sequence(mut self, replies: &[(u16, &str)]) -> Self {
        assert!(!replies.is_empty(), "at least one RCPT TO reply is needed");
        self.script.rcpt = replies
            .iter()
            .map(|&(code, text)| Reply::new(code, text))
            .collect();
        self
    }

    #[must_use]
    pub fn with_starttls_response(mut self, code: u16, text: impl Into<String>) -> Self {
        self.script.starttls = Reply::new(code, text);
        self
    }

    /// Advertise STARTTLS, accept it, and complete the handshake.
    #[must_use]
    pub fn with_tls(mut self) -> Self {
        self.tls = true;
        self.script.starttls = Reply::new(220, "2.0.0 Ready to start TLS");
        self.advertising_starttls()
    }

    #[must_use]
    pub const fn with_network_error_after_commands(mut self, count: usize) -> Self {
        self.script.fault = Some(Fault::Drop(count));
        self
    }

    /// Go silent on the nth command (0-indexed).
    #[must_use]
    pub const fn with_timeout_on_command(mut self, index: usize) -> Self {
        self.script.fault = Some(Fault::Hang(index));
        self
    }

    /// Bind to an ephemeral port on 127.0.0.1 and start accepting.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound or the test
    /// certificate cannot be loaded.
    pub async fn build(mut self) -> io::Result<MockSmtpServer> {
        if self.tls {
            self.script.tls = Some(acceptor()?);
        }

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let script = Arc::new(self.script);
        let log = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let task = tokio::spawn({
            let log = Arc::clone(&log);
            let connections = Arc::clone(&connections);

            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let connection = connections.fetch_add(1, Ordering::SeqCst);
                    let script = Arc::clone(&script);
                    let log = Arc::clone(&log);

                    tokio::spawn(async move {
                        if let Err(err) = script.converse(stream, connection, &log).await {
                            eprintln!("mock SMTP connection {connection} ended: {err}");
                        }
                    });
                }
            }
        });

        Ok(MockSmtpServer {
            addr,
            log,
            connections,
            task,
        })
    }
}
