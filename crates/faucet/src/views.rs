//! HTML pages
//!
//! Pages are Handlebars templates. Each page renders its body first, then the
//! shared layout with the body inlined. Every `{{value}}` is HTML-escaped;
//! only the pre-rendered body goes through a triple-stash.

use crate::config::TokenInfo;
use crate::error::{FaucetError, FaucetResult};
use crate::service::{FaucetStatus, TransferReceipt, UNAVAILABLE_MESSAGE};
use axum::response::Html;
use handlebars::Handlebars;
use serde_json::{json, Value};

const LAYOUT: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{{token.name}} Faucet</title>
    <style>
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 720px; margin: 40px auto; padding: 0 20px; color: #222; }
        dl { display: grid; grid-template-columns: max-content auto; gap: 6px 16px; }
        dt { color: #666; }
        dd { margin: 0; word-break: break-all; }
        .notice { padding: 12px; border-radius: 6px; margin: 16px 0; }
        .notice.info { background: #e8f4ff; }
        .notice.error { background: #ffe8e8; }
        input { width: 100%; padding: 8px; margin: 8px 0; box-sizing: border-box; }
        pre { background: #f6f6f6; padding: 12px; overflow-x: auto; }
    </style>
</head>
<body>
    <h1>{{token.name}} ({{token.symbol}}) Faucet</h1>
    <dl>
        <dt>Script hash</dt><dd>{{token.script_hash}}</dd>
        <dt>Faucet wallet</dt><dd>{{status.wallet}}</dd>
        <dt>Balance</dt><dd>{{status.balance}} {{token.symbol}}</dd>
        <dt>Block height</dt><dd>{{status.height}}</dd>
        <dt>Wallet height</dt><dd>{{status.wallet_height}}</dd>
    </dl>
    {{{body}}}
</body>
</html>"#;

const INDEX: &str = r#"{{#if come_back}}<div class="notice error">{{unavailable}}</div>{{/if}}
    {{#if message}}<div class="notice {{#if error}}error{{else}}info{{/if}}">{{message}}</div>{{/if}}
    <form method="post" action="/ask">
        <label for="address_to">Wallet address</label>
        <input type="text" id="address_to" name="address_to" value="{{address_to}}" autocomplete="off">
        <button type="submit">Request {{drip}} {{token.symbol}}</button>
    </form>"#;

const SUCCESS: &str = r#"<div class="notice info">Sent {{amount}} {{token.symbol}} to {{address}}</div>
    <p>Transaction: <code>{{transaction_id}}</code></p>
    <pre>{{transaction}}</pre>
    <p><a href="/">Back</a></p>"#;

/// Everything a page shows besides its body.
#[derive(Debug, Default)]
pub struct PageContext {
    pub message: Option<String>,
    pub error: bool,
    /// Banner shown when the faucet cannot dispense
    pub come_back: bool,
    /// Previous form input, echoed back after a failed claim
    pub address_to: String,
}

/// Compiled page templates
pub struct PageRenderer {
    handlebars: Handlebars<'static>,
}

impl PageRenderer {
    pub fn new() -> FaucetResult<Self> {
        let mut handlebars = Handlebars::new();

        // Catch template variables the context does not provide
        handlebars.set_strict_mode(true);

        for (name, template) in [("layout", LAYOUT), ("index", INDEX), ("success", SUCCESS)] {
            handlebars.register_template_string(name, template).map_err(|e| {
                FaucetError::InternalError(format!("Invalid {} template: {}", name, e))
            })?;
        }

        Ok(Self { handlebars })
    }

    pub fn index(&self, token: &TokenInfo, status: &FaucetStatus, ctx: &PageContext) -> FaucetResult<Html<String>> {
        let mut vars = page_vars(token, status);
        vars["come_back"] = json!(ctx.come_back || !status.can_dispense());
        vars["unavailable"] = json!(UNAVAILABLE_MESSAGE);
        vars["message"] = json!(ctx.message.as_deref().unwrap_or(""));
        vars["error"] = json!(ctx.error);
        vars["address_to"] = json!(ctx.address_to);
        vars["drip"] = json!(status.drip_amount.to_decimal_string(token.decimals));

        self.page("index", vars)
    }

    pub fn success(
        &self,
        token: &TokenInfo,
        status: &FaucetStatus,
        receipt: &TransferReceipt,
    ) -> FaucetResult<Html<String>> {
        let transaction = serde_json::to_string_pretty(&receipt.transaction)
            .unwrap_or_else(|_| receipt.transaction.to_string());

        let mut vars = page_vars(token, status);
        vars["amount"] = json!(receipt.amount.to_decimal_string(token.decimals));
        vars["address"] = json!(receipt.address.as_str());
        vars["transaction_id"] = json!(receipt.transaction_id);
        vars["transaction"] = json!(transaction);

        self.page("success", vars)
    }

    fn page(&self, name: &str, mut vars: Value) -> FaucetResult<Html<String>> {
        let body = self.render(name, &vars)?;
        vars["body"] = json!(body);
        self.render("layout", &vars).map(Html)
    }

    fn render(&self, name: &str, vars: &Value) -> FaucetResult<String> {
        self.handlebars
            .render(name, vars)
            .map_err(|e| FaucetError::InternalError(format!("Failed to render {} page: {}", name, e)))
    }
}

/// Status context shown in the layout
fn page_vars(token: &TokenInfo, status: &FaucetStatus) -> Value {
    json!({
        "token": {
            "name": token.name,
            "symbol": token.symbol,
            "script_hash": token.script_hash,
        },
        "status": {
            "wallet": status.faucet_wallet.as_ref().map(|w| w.as_str()).unwrap_or(""),
            "balance": status.balance.to_decimal_string(token.decimals),
            "height": status.chain.height,
            "wallet_height": status.chain.wallet_height,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::WalletAddress;
    use crate::amount::TokenAmount;
    use crate::gateway::{ChainStatus, Confirmation};

    fn token() -> TokenInfo {
        TokenInfo {
            name: "Test Token".to_string(),
            symbol: "TST".to_string(),
            script_hash: "0x0102030405060708090a0b0c0d0e0f1011121314".to_string(),
            decimals: 8,
        }
    }

    fn status(balance: u128) -> FaucetStatus {
        FaucetStatus {
            faucet_wallet: None,
            balance: TokenAmount::from_units(balance),
            drip_amount: TokenAmount::from_units(1_000),
            chain: ChainStatus { height: 41, wallet_height: 40 },
            wallet_claims: 0,
            ip_claims: 0,
        }
    }

    #[test]
    fn test_index_echoes_input_escaped() {
        let pages = PageRenderer::new().unwrap();
        let ctx = PageContext {
            message: Some("Invalid wallet address: <bad>".to_string()),
            error: true,
            address_to: "\"><script>alert(1)</script>".to_string(),
            ..Default::default()
        };
        let Html(page) = pages.index(&token(), &status(5_000), &ctx).unwrap();
        assert!(page.contains("&lt;bad&gt;"));
        assert!(page.contains("&quot;&gt;&lt;script&gt;"));
        assert!(!page.contains("<script>"));
        assert!(!page.contains("<bad>"));
        assert!(page.contains(r#"class="notice error""#));
        assert!(!page.contains(UNAVAILABLE_MESSAGE));
    }

    #[test]
    fn test_index_shows_banner_when_empty() {
        let pages = PageRenderer::new().unwrap();
        let Html(page) = pages.index(&token(), &status(999), &PageContext::default()).unwrap();
        assert!(page.contains(UNAVAILABLE_MESSAGE));
        assert!(page.contains("<dd>41</dd>"));
        assert!(page.contains("<form method=\"post\" action=\"/ask\">"));
    }

    #[test]
    fn test_success_escapes_node_json() {
        let pages = PageRenderer::new().unwrap();
        let receipt = TransferReceipt {
            address: WalletAddress::from_script_hash([3; 20]),
            amount: TokenAmount::from_units(1_000),
            transaction_id: "deadbeef".to_string(),
            fee_paid: TokenAmount::ZERO,
            gas_used: TokenAmount::ZERO,
            confirmation: Confirmation::Pending,
            transaction: json!({"txid": "deadbeef", "attributes": ["<img>"]}),
            submitted_at: chrono::Utc::now(),
        };
        let Html(page) = pages.success(&token(), &status(5_000), &receipt).unwrap();
        assert!(page.contains("<code>deadbeef</code>"));
        assert!(page.contains("&lt;img&gt;"));
        assert!(!page.contains("<img>"));
    }
}
