//! Premium-domain block page. Grounded on
//! `original_source/proxy/internal/httpproxy/proxy.go`'s
//! `respondPremiumRequired`/`blockPageTemplate`.

use std::io::Cursor;

use base64::Engine;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use image::{ImageFormat, Luma};
use qrcode::QrCode;

use super::ProxyBody;

const QR_DIMENSION: u32 = 180;

/// Renders the 402 unlock page for `host`, inlining a QR code that points at
/// the PayHole pay URL. Falls back to a plain-text 402 if the QR cannot be
/// rendered or encoded.
pub fn render(host: &str) -> Response<ProxyBody> {
    let pay_url = format!("https://payhole.app/pay?domain={}", urlescape(host));

    match qr_data_uri(&pay_url) {
        Ok(qr_data_uri) => html_response(host, &pay_url, &qr_data_uri),
        Err(_) => plain_response(),
    }
}

fn qr_data_uri(pay_url: &str) -> Result<String, anyhow::Error> {
    let code = QrCode::new(pay_url.as_bytes())?;
    let image = code.render::<Luma<u8>>().min_dimensions(QR_DIMENSION, QR_DIMENSION).build();

    let mut png_bytes = Vec::new();
    image::DynamicImage::ImageLuma8(image).write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)?;

    Ok(format!("data:image/png;base64,{}", base64::engine::general_purpose::STANDARD.encode(png_bytes)))
}

fn html_response(host: &str, pay_url: &str, qr_data_uri: &str) -> Response<ProxyBody> {
    let phantom_url = format!("https://phantom.app/ul/browse/{}", urlescape(pay_url));
    let solflare_url = format!("https://solflare.com/provider?url={}", urlescape(pay_url));

    let body = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>PayHole Unlock Required</title>
  <meta name="viewport" content="width=device-width, initial-scale=1">
</head>
<body>
  <main>
    <h1>Unlock {host}</h1>
    <p>This premium domain is protected by <strong>PayHole</strong>. Complete the USDC unlock below to continue.</p>
    <figure>
      <img src="{qr_data_uri}" width="{dim}" height="{dim}" alt="PayHole QR">
      <figcaption>Scan with any Solana wallet to approve the unlock.</figcaption>
    </figure>
    <div class="actions">
      <a class="button primary" href="{phantom_url}">Open in Phantom</a>
      <a class="button secondary" href="{solflare_url}">Open in Solflare</a>
      <a class="button secondary" href="{pay_url}">Pay from browser</a>
    </div>
  </main>
</body>
</html>"#,
        dim = QR_DIMENSION,
    );

    Response::builder()
        .status(StatusCode::PAYMENT_REQUIRED)
        .header(hyper::header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| plain_response())
}

fn plain_response() -> Response<ProxyBody> {
    Response::builder()
        .status(StatusCode::PAYMENT_REQUIRED)
        .body(Full::new(Bytes::from_static(b"payment required")))
        .unwrap()
}

fn urlescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn renders_unlock_page_with_expected_markers() {
        let resp = render("premium.payhole.news");
        assert_eq!(resp.status(), StatusCode::PAYMENT_REQUIRED);

        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();

        assert!(text.contains("PayHole Unlock Required"));
        assert!(text.contains("premium.payhole.news"));
        assert!(text.contains("data:image/png;base64,"));
    }

    #[test]
    fn urlescape_percent_encodes_reserved_characters() {
        assert_eq!(urlescape("premium.payhole.news"), "premium.payhole.news");
        assert_eq!(urlescape("a b"), "a%20b");
        assert_eq!(urlescape("a/b?c"), "a%2Fb%3Fc");
    }
}
