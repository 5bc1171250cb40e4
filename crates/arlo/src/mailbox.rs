//! IMAP reader for the email factor's one-time code.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use mail_parser::MessageParser;
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore};

use arlo_core::{CoreError, MailboxConnection, OneTimeCodeSource};

/// Reads the newest unseen code email over implicit-TLS IMAP and deletes
/// it, so a later login never sees the same code twice.
pub struct ImapCodeSource;

#[async_trait]
impl OneTimeCodeSource for ImapCodeSource {
    async fn fetch_code(&self, connection: &MailboxConnection, subject: &str) -> Result<Option<String>, CoreError> {
        let raw = fetch_unseen(connection, subject).await.map_err(|e| {
            CoreError::Internal(format!("mailbox {}:{}: {e}", connection.host, connection.port))
        })?;
        Ok(raw.as_deref().and_then(code_text))
    }
}

async fn tls_connect(
    connection: &MailboxConnection,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>, String> {
    let roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.into(),
    };
    let config = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| e.to_string())?
        .with_root_certificates(roots)
        .with_no_client_auth();

    let server_name = ServerName::try_from(connection.host.clone()).map_err(|e| e.to_string())?;
    let tcp = TcpStream::connect((connection.host.as_str(), connection.port))
        .await
        .map_err(|e| e.to_string())?;
    TlsConnector::from(Arc::new(config))
        .connect(server_name, tcp)
        .await
        .map_err(|e| e.to_string())
}

/// Raw RFC 822 bytes of the newest unseen message with `subject`, which
/// is then flagged deleted and expunged.
async fn fetch_unseen(connection: &MailboxConnection, subject: &str) -> Result<Option<Vec<u8>>, String> {
    let stream = tls_connect(connection).await?;
    let mut client = async_imap::Client::new(stream);
    let _greeting = client.read_response().await;

    let mut session = client
        .login(&connection.user, connection.password.expose_secret())
        .await
        .map_err(|(e, _)| format!("login failed: {e}"))?;
    session.select("INBOX").await.map_err(|e| e.to_string())?;

    let query = format!("UNSEEN SUBJECT \"{}\"", subject.replace('"', ""));
    let found = session.search(&query).await.map_err(|e| e.to_string())?;
    let Some(newest) = found.into_iter().max() else {
        tracing::debug!("no unseen code email yet");
        let _ = session.logout().await;
        return Ok(None);
    };

    let seq = newest.to_string();
    let fetched: Vec<_> = session
        .fetch(&seq, "RFC822")
        .await
        .map_err(|e| e.to_string())?
        .try_collect()
        .await
        .map_err(|e| e.to_string())?;
    let raw = fetched.iter().find_map(|f| f.body().map(<[u8]>::to_vec));

    // The code is single-use; drop the message either way.
    let flagged: Result<Vec<_>, _> = match session.store(&seq, "+FLAGS (\\Deleted)").await {
        Ok(updates) => updates.try_collect().await,
        Err(e) => Err(e),
    };
    if let Err(e) = flagged {
        tracing::warn!(error = %e, "could not flag code email for deletion");
    } else if let Ok(expunged) = session.expunge().await {
        let _: Result<Vec<_>, _> = expunged.try_collect().await;
    }
    let _ = session.logout().await;

    tracing::debug!(found = raw.is_some(), "code email fetched");
    Ok(raw)
}

/// Text holding the code: the HTML `<h1>` the vendor puts it in, or the
/// plain body when there is no HTML part.
pub fn code_text(raw: &[u8]) -> Option<String> {
    let message = MessageParser::default().parse(raw)?;
    if let Some(heading) = message.body_html(0).as_deref().and_then(first_heading) {
        return Some(heading);
    }
    message.body_text(0).map(|text| text.trim().to_owned())
}

fn first_heading(html: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let open = lower.find("<h1")?;
    let start = open + lower[open..].find('>')? + 1;
    let end = start + lower[start..].find("</h1")?;

    let mut text = String::new();
    let mut in_tag = false;
    for c in html[start..end].chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag && !c.is_control() => text.push(c),
            _ => {}
        }
    }
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const HTML_MAIL: &str = "From: Arlo <do_not_reply@arlo.com>\r\n\
        To: me@example.com\r\n\
        Subject: Your one-time authentication code from Arlo\r\n\
        MIME-Version: 1.0\r\n\
        Content-Type: text/html; charset=utf-8\r\n\
        \r\n\
        <html><head><style>p { color: #112233; }</style></head>\r\n\
        <body><p>Use this code:</p><H1 class=\"code\">\r\n  <b>482913</b>\r\n</H1></body></html>\r\n";

    const TEXT_MAIL: &str = "From: Arlo <do_not_reply@arlo.com>\r\n\
        Subject: Your one-time authentication code from Arlo\r\n\
        Content-Type: text/plain; charset=utf-8\r\n\
        \r\n\
        Your code is 120934\r\n";

    #[test]
    fn heading_wins_over_other_digit_runs() {
        let text = code_text(HTML_MAIL.as_bytes()).unwrap();
        assert_eq!(text, "482913");
        assert_eq!(arlo_core::mailbox::extract_code(&text).as_deref(), Some("482913"));
    }

    #[test]
    fn plain_body_is_used_without_html() {
        let text = code_text(TEXT_MAIL.as_bytes()).unwrap();
        assert_eq!(arlo_core::mailbox::extract_code(&text).as_deref(), Some("120934"));
    }

    #[test]
    fn heading_parser_ignores_missing_or_empty_headings() {
        assert_eq!(first_heading("<p>no heading</p>"), None);
        assert_eq!(first_heading("<h1> </h1>"), None);
        assert_eq!(first_heading("<h1>7<span>1</span>0</h1>").as_deref(), Some("710"));
    }
}
