use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use rustls::{ClientConfig, ClientSession, StreamOwned};

use super::{Transport, TryClone};

/// TLS material an implementation may configure: a trusted root certificate
/// path (falls back to the Mozilla bundle via
/// `webpki-roots` when absent), and an optional client certificate chain +
/// private key for mutual TLS.
#[derive(Default, Clone)]
pub struct TlsConfig {
    pub root_cert_path: Option<String>,
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
}

fn build_rustls_config(config: &TlsConfig) -> io::Result<ClientConfig> {
    let mut rustls_config = ClientConfig::new();

    if let Some(path) = &config.root_cert_path {
        let mut reader = BufReader::new(File::open(path)?);
        let certs = rustls_pemfile::certs(&mut reader)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid root certificate"))?;
        for cert in certs {
            rustls_config
                .root_store
                .add(&rustls::Certificate(cert))
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        }
    } else {
        rustls_config
            .root_store
            .add_server_trust_anchors(&webpki_roots::TLS_SERVER_ROOTS);
    }

    if let (Some(cert_path), Some(key_path)) = (&config.client_cert_path, &config.client_key_path)
    {
        let cert_chain = load_certs(cert_path)?;
        let key = load_private_key(key_path)?;
        rustls_config
            .set_single_client_cert(cert_chain, key)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    }

    Ok(rustls_config)
}

fn load_certs(path: impl AsRef<Path>) -> io::Result<Vec<rustls::Certificate>> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::certs(&mut reader)
        .map(|certs| certs.into_iter().map(rustls::Certificate).collect())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid certificate chain"))
}

fn load_private_key(path: impl AsRef<Path>) -> io::Result<rustls::PrivateKey> {
    let mut reader = BufReader::new(File::open(path)?);
    let keys = rustls_pemfile::pkcs8_private_keys(&mut reader)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid private key"))?;
    keys.into_iter()
        .next()
        .map(rustls::PrivateKey)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no private key found"))
}

/// TLS transport: `rustls::StreamOwned` over a plain `TcpStream`, shared
/// behind a mutex so the dispatcher's reader and the foreground writer can
/// each hold a handle (a TLS session, unlike a TCP socket, isn't something
/// the OS can `dup` for us).
#[derive(Clone)]
pub struct Tls(Arc<Mutex<StreamOwned<ClientSession, TcpStream>>>);

impl Tls {
    pub fn connect<A: ToSocketAddrs>(addr: A, server_name: &str, config: &TlsConfig) -> io::Result<Self> {
        let rustls_config = build_rustls_config(config)?;
        let dns_name = webpki::DNSNameRef::try_from_ascii_str(server_name)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid server name"))?;
        let session = ClientSession::new(&Arc::new(rustls_config), dns_name);
        let sock = TcpStream::connect(addr)?;
        sock.set_nodelay(true)?;

        Ok(Tls(Arc::new(Mutex::new(StreamOwned::new(session, sock)))))
    }
}

impl Read for Tls {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.lock().unwrap().read(buf)
    }
}

impl Write for Tls {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().unwrap().flush()
    }
}

impl TryClone for Tls {
    fn try_clone(&self) -> io::Result<Self> {
        Ok(Tls(self.0.clone()))
    }
}

impl Transport for Tls {
    fn close(&mut self) -> io::Result<()> {
        let mut stream = self.0.lock().unwrap();
        stream.sock.shutdown(Shutdown::Both)
    }
}
