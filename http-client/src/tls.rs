use std::{sync::Arc, time::SystemTime};
use stratus_http::{Error, ErrorKind, Result, SelfSigned};
use tokio_rustls::rustls::{
    client::{ServerCertVerified, ServerCertVerifier, WebPkiVerifier},
    Certificate, CertificateError, ClientConfig, Error as TlsError, RootCertStore, ServerName,
};

pub(crate) fn build_tls_context(
    self_signed: SelfSigned,
    extra_root_certs_pem: &[Vec<u8>],
) -> Result<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();

    let native_certs = rustls_native_certs::load_native_certs().map_err(|err| {
        Error::new(
            ErrorKind::SslHandshakeFailure,
            format!("Unable to load OS trust store: {}", err),
        )
    })?;
    for cert in native_certs {
        // 个别系统证书可能无法解析，跳过即可。
        let _ = roots.add(&Certificate(cert.0));
    }

    for pem in extra_root_certs_pem {
        let ders = rustls_pemfile::certs(&mut pem.as_slice()).map_err(|err| {
            Error::new(
                ErrorKind::SslHandshakeFailure,
                format!("Unable to parse extra PEM certificates: {}", err),
            )
        })?;
        for der in ders {
            roots.add(&Certificate(der)).map_err(|err| {
                Error::new(
                    ErrorKind::SslHandshakeFailure,
                    format!("Unable to add extra certificate: {}", err),
                )
            })?;
        }
    }

    let verifier = SelfSignedAwareVerifier {
        inner: WebPkiVerifier::new(Arc::new(roots), None),
        self_signed,
    };

    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();

    Ok(Arc::new(config))
}

/// 证书校验器
///
/// 始终执行 RFC 2818 主机名校验。策略允许时仅放行自签名证书
/// 导致的未知签发者错误，其余证书链错误照常致命。
struct SelfSignedAwareVerifier {
    inner: WebPkiVerifier,
    self_signed: SelfSigned,
}

impl ServerCertVerifier for SelfSignedAwareVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        intermediates: &[Certificate],
        server_name: &ServerName,
        scts: &mut dyn Iterator<Item = &[u8]>,
        ocsp_response: &[u8],
        now: SystemTime,
    ) -> std::result::Result<ServerCertVerified, TlsError> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            scts,
            ocsp_response,
            now,
        ) {
            Err(TlsError::InvalidCertificate(CertificateError::UnknownIssuer))
                if self.self_signed == SelfSigned::Permitted =>
            {
                // 把终端证书自身当作信任锚重新校验，
                // 签名和主机名检查因此保持生效。
                let mut pinned = RootCertStore::empty();
                pinned
                    .add(end_entity)
                    .map_err(|_| TlsError::InvalidCertificate(CertificateError::BadEncoding))?;
                WebPkiVerifier::new(Arc::new(pinned), None).verify_server_cert(
                    end_entity,
                    &[],
                    server_name,
                    scts,
                    ocsp_response,
                    now,
                )
            }
            result => result,
        }
    }
}
