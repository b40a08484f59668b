/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

// src/listener/options.rs
// Translation of the MQTT configuration into a ready-to-run rumqttc
// client: protocol selection, transport/TLS setup and credentials.

use std::sync::Arc;

use rumqttc::{AsyncClient, EventLoop, MqttOptions, TlsConfiguration, Transport};
use rumqttc::v5;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio::time::Duration;
use tracing::info;

use crate::config::MqttSettings;
use crate::errors::MqttError;

const DEFAULT_PORT: u16 = 1883;
const DEFAULT_PORT_TLS: u16 = 8883;

// Capacity of the request channel between the async client and its
// event loop.
const CHANNEL_CAPACITY: usize = 1000;

// ClientBundle pairs a client with its event loop; the protocol
// version decides which of rumqttc's two client stacks is used.
pub(crate) enum ClientBundle {
    V4 {
        client: AsyncClient,
        event_loop: EventLoop,
    },
    V5 {
        client: v5::AsyncClient,
        event_loop: Box<v5::EventLoop>,
    },
}

pub(crate) fn build_client(settings: &MqttSettings) -> Result<ClientBundle, MqttError> {
    let client_id = settings
        .client_id
        .clone()
        .unwrap_or_else(|| format!("mqtt-pg-logger-{}", std::process::id()));
    let port = settings
        .port
        .unwrap_or(if settings.uses_tls() { DEFAULT_PORT_TLS } else { DEFAULT_PORT });
    let keepalive = Duration::from_secs(settings.keepalive);

    let transport = if settings.uses_tls() {
        Some(Transport::tls_with_config(tls_configuration(settings)?))
    } else {
        None
    };

    if settings.protocol == 5 {
        let mut options = v5::MqttOptions::new(client_id, &settings.host, port);
        options.set_keep_alive(keepalive);
        if let Some(transport) = transport {
            options.set_transport(transport);
        }
        if settings.user.is_some() || settings.password.is_some() {
            options.set_credentials(
                settings.user.clone().unwrap_or_default(),
                settings.password.clone().unwrap_or_default(),
            );
        }

        let (client, event_loop) = v5::AsyncClient::new(options, CHANNEL_CAPACITY);
        return Ok(ClientBundle::V5 {
            client,
            event_loop: Box::new(event_loop),
        });
    }

    if settings.protocol == 3 {
        // rumqttc speaks 3.1.1 and 5 only; the 3.1 connect dialect is
        // close enough that brokers accepting 3.1 accept 3.1.1 too.
        info!("MQTT protocol 3 configured; negotiating as 3.1.1");
    }

    let mut options = MqttOptions::new(client_id, &settings.host, port);
    options.set_keep_alive(keepalive);
    if let Some(transport) = transport {
        options.set_transport(transport);
    }
    if settings.user.is_some() || settings.password.is_some() {
        options.set_credentials(
            settings.user.clone().unwrap_or_default(),
            settings.password.clone().unwrap_or_default(),
        );
    }

    let (client, event_loop) = AsyncClient::new(options, CHANNEL_CAPACITY);
    Ok(ClientBundle::V4 { client, event_loop })
}

fn tls_configuration(settings: &MqttSettings) -> Result<TlsConfiguration, MqttError> {
    let client_identity = load_client_identity(settings)?;

    if settings.ssl_insecure {
        info!("disabling TLS certificate verification");
        let builder = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier));
        let config = match client_identity {
            Some((certs, key)) => builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| MqttError::Tls(format!("invalid client certificate/key: {e}")))?,
            None => builder.with_no_client_auth(),
        };
        return Ok(TlsConfiguration::Rustls(Arc::new(config)));
    }

    let ca_path = settings.ssl_ca_certs.as_ref().ok_or_else(|| {
        MqttError::Tls("ssl_ca_certs is required when TLS is enabled without ssl_insecure".into())
    })?;
    let ca_pem = std::fs::read(ca_path)
        .map_err(|e| MqttError::Tls(format!("cannot read {}: {e}", ca_path.display())))?;

    match client_identity {
        None => Ok(TlsConfiguration::Simple {
            ca: ca_pem,
            alpn: None,
            client_auth: None,
        }),
        Some((certs, key)) => {
            let mut roots = rustls::RootCertStore::empty();
            for cert in rustls_pemfile::certs(&mut ca_pem.as_slice()) {
                let cert = cert.map_err(|e| {
                    MqttError::Tls(format!("invalid CA material in {}: {e}", ca_path.display()))
                })?;
                roots.add(cert).map_err(|e| {
                    MqttError::Tls(format!("rejected CA certificate in {}: {e}", ca_path.display()))
                })?;
            }
            let config = rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_client_auth_cert(certs, key)
                .map_err(|e| MqttError::Tls(format!("invalid client certificate/key: {e}")))?;
            Ok(TlsConfiguration::Rustls(Arc::new(config)))
        }
    }
}

type ClientIdentity = (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>);

fn load_client_identity(settings: &MqttSettings) -> Result<Option<ClientIdentity>, MqttError> {
    match (&settings.ssl_certfile, &settings.ssl_keyfile) {
        (None, None) => Ok(None),
        (Some(cert_path), Some(key_path)) => {
            let cert_pem = std::fs::read(cert_path)
                .map_err(|e| MqttError::Tls(format!("cannot read {}: {e}", cert_path.display())))?;
            let certs: Vec<CertificateDer<'static>> =
                rustls_pemfile::certs(&mut cert_pem.as_slice())
                    .collect::<Result<_, _>>()
                    .map_err(|e| {
                        MqttError::Tls(format!("invalid certificate in {}: {e}", cert_path.display()))
                    })?;

            let key_pem = std::fs::read(key_path)
                .map_err(|e| MqttError::Tls(format!("cannot read {}: {e}", key_path.display())))?;
            let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
                .map_err(|e| {
                    MqttError::Tls(format!("invalid private key in {}: {e}", key_path.display()))
                })?
                .ok_or_else(|| {
                    MqttError::Tls(format!("no private key found in {}", key_path.display()))
                })?;

            Ok(Some((certs, key)))
        }
        _ => Err(MqttError::Tls(
            "ssl_certfile and ssl_keyfile must be configured together".into(),
        )),
    }
}

// NoVerifier accepts any server certificate; only installed when
// ssl_insecure is explicitly configured.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> MqttSettings {
        MqttSettings {
            client_id: None,
            host: "localhost".to_string(),
            port: None,
            keepalive: 60,
            protocol: 4,
            ssl_ca_certs: None,
            ssl_certfile: None,
            ssl_keyfile: None,
            ssl_insecure: false,
            user: None,
            password: None,
            filter_message_id_0: false,
            subscriptions: vec!["base/#".to_string()],
            skip_subscription_regexes: Vec::new(),
        }
    }

    #[test]
    fn tls_without_ca_or_insecure_is_rejected() {
        let mut settings = settings();
        settings.ssl_certfile = Some("/nonexistent/cert.pem".into());
        settings.ssl_keyfile = Some("/nonexistent/key.pem".into());
        assert!(matches!(
            tls_configuration(&settings),
            Err(MqttError::Tls(_))
        ));
    }

    #[test]
    fn certfile_without_keyfile_is_rejected() {
        let mut settings = settings();
        settings.ssl_certfile = Some("/nonexistent/cert.pem".into());
        assert!(matches!(
            load_client_identity(&settings),
            Err(MqttError::Tls(_))
        ));
    }

    #[test]
    fn insecure_without_identity_builds() {
        let mut settings = settings();
        settings.ssl_insecure = true;
        assert!(matches!(
            tls_configuration(&settings),
            Ok(TlsConfiguration::Rustls(_))
        ));
    }
}
