use std::{fs::File, io::BufReader};

use rustls::{Certificate, PrivateKey, ServerConfig};

use super::error::Error;

pub fn load_certificates_from_pem(path: &str) -> Result<Vec<Certificate>, Error> {
    let file = File::open(path).map_err(Error::StdIo)?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader).map_err(Error::StdIo)?;
    if certs.is_empty() {
        return Err(Error::Tls(format!("No certificate found in {path}")));
    }

    Ok(certs.into_iter().map(Certificate).collect())
}

pub fn load_private_key_from_file(path: &str) -> Result<PrivateKey, Error> {
    let file = File::open(path).map_err(Error::StdIo)?;
    let mut reader = BufReader::new(file);

    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut reader).map_err(Error::StdIo)?;

    match keys.len() {
        0 => Err(Error::Tls(format!("No PKC8-encoded private key found in {path}"))),
        1 => Ok(PrivateKey(keys.remove(0))),
        _ => Err(Error::Tls(format!(
            "More than one PKC8-encoded private key found in {path}"
        ))),
    }
}

pub fn server_config(cert: &str, key: &str) -> Result<ServerConfig, Error> {
    let cert_chain = load_certificates_from_pem(cert)?;
    let private_key = load_private_key_from_file(key)?;

    ServerConfig::builder()
        .with_safe_default_cipher_suites()
        .with_safe_default_kx_groups()
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(cert_chain, private_key)
        .map_err(|e| Error::Tls(e.to_string()))
}
