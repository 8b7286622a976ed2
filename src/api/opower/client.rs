use std::time::Duration;

use jiff::civil::Date;
use log::{debug, info};
use reqwest::{
    header::{ACCEPT, AUTHORIZATION, USER_AGENT},
    Client, RequestBuilder,
};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

const BROWSER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// What the sync job needs from the utility.
///
/// `login` is idempotent: calling it when the session is already
/// authenticated succeeds and leaves the session as it was.
#[allow(async_fn_in_trait)]
pub trait UsageApi {
    async fn login(&mut self) -> Result<(), SyncError>;

    /// Identifier of the (only) customer attached to the account.
    async fn customer_id(&self) -> Result<String, SyncError>;

    /// Raw zipped CSV export with the interval usage between `start` and
    /// `end`, both dates inclusive.
    async fn usage_export(
        &self,
        customer_id: &str,
        start: Date,
        end: Date,
    ) -> Result<Vec<u8>, SyncError>;
}

#[derive(Clone, Debug)]
pub struct OpowerEndpoints {
    /// Utility code used by Opower, e.g. "pge"
    pub utility: String,
    /// Utility web site login, takes the username and password
    pub login_url: String,
    /// Page that starts the SSO hand-off from the utility to Opower
    pub sso_url: String,
    /// e.g. https://pge.opower.com
    pub opower_url: String,
}

impl OpowerEndpoints {
    pub fn pge() -> OpowerEndpoints {
        OpowerEndpoints {
            utility: "pge".to_string(),
            login_url: "https://www.pge.com/eimpapi/auth/login".to_string(),
            sso_url: "https://itiamping.cloud.pge.com/idp/startSSO.ping?PartnerSpId=sso.opower.com&TargetResource=https%3A%2F%2Fpge.opower.com%2Fei%2Fapp%2Fr%2Fenergy-usage-details".to_string(),
            opower_url: "https://pge.opower.com".to_string(),
        }
    }

    pub fn token_url(&self) -> String {
        format!(
            "{}/ei/edge/apis/user-account-control-v1/cws/v1/{}/account/signin",
            self.opower_url, self.utility
        )
    }

    pub fn customers_url(&self) -> String {
        format!(
            "{}/ei/edge/apis/multi-account-v1/cws/{}/customers?offset=0&batchSize=100&addressFilter=",
            self.opower_url, self.utility
        )
    }

    pub fn usage_export_url(&self, customer_id: &str, start: Date, end: Date) -> String {
        format!(
            "{}/ei/edge/apis/DataBrowser-v1/cws/utilities/{}/customers/{}/usage_export/download?format=csv&startDate={}&endDate={}",
            self.opower_url, self.utility, customer_id, start, end
        )
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(rename = "sessionToken")]
    session_token: String,
}

#[derive(Deserialize)]
struct CustomersResponse {
    customers: Vec<Customer>,
}

#[derive(Deserialize)]
struct Customer {
    uuid: String,
}

/// The auto-submitted form in the SSO page that hands the user over to Opower.
#[derive(Debug, PartialEq)]
struct SamlForm {
    action: String,
    saml_response: String,
    relay_state: Option<String>,
}

impl SamlForm {
    fn parse(html: &str) -> Result<SamlForm, SyncError> {
        let document = Html::parse_document(html);
        let form_selector = Selector::parse("form[action]").unwrap();
        let saml_selector = Selector::parse(r#"input[name="SAMLResponse"]"#).unwrap();
        let relay_selector = Selector::parse(r#"input[name="RelayState"]"#).unwrap();

        let form = document
            .select(&form_selector)
            .next()
            .ok_or_else(|| SyncError::Auth("no SSO form in page".to_string()))?;
        let action = form.value().attr("action").unwrap_or_default();
        let saml_response = form
            .select(&saml_selector)
            .next()
            .and_then(|e| e.value().attr("value"))
            .ok_or_else(|| SyncError::Auth("no SAMLResponse in SSO page".to_string()))?;
        let relay_state = form
            .select(&relay_selector)
            .next()
            .and_then(|e| e.value().attr("value"));
        Ok(SamlForm {
            action: action.to_string(),
            saml_response: saml_response.to_string(),
            relay_state: relay_state.map(|s| s.to_string()),
        })
    }
}

/// Client for the Opower usage APIs, authenticated through the utility web site.
/// One cookie store is shared by every request of the session.
pub struct OpowerClient {
    client: Client,
    endpoints: OpowerEndpoints,
    username: String,
    password: String,
    access_token: Option<String>,
}

impl OpowerClient {
    pub fn new(
        endpoints: OpowerEndpoints,
        username: String,
        password: String,
    ) -> Result<OpowerClient, SyncError> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(OpowerClient {
            client,
            endpoints,
            username,
            password,
            access_token: None,
        })
    }

    pub fn is_logged_in(&self) -> bool {
        self.access_token.is_some()
    }

    fn get(&self, url: String) -> Result<RequestBuilder, SyncError> {
        let token = self
            .access_token
            .as_ref()
            .ok_or_else(|| SyncError::Auth("not logged in".to_string()))?;
        Ok(self
            .client
            .get(url)
            .header(USER_AGENT, BROWSER_AGENT)
            .header(AUTHORIZATION, format!("Bearer {}", token)))
    }
}

impl UsageApi for OpowerClient {
    async fn login(&mut self) -> Result<(), SyncError> {
        if self.is_logged_in() {
            debug!("already logged in as {}", self.username);
            return Ok(());
        }
        info!("logging in as {}", self.username);

        let resp = self
            .client
            .post(&self.endpoints.login_url)
            .header(USER_AGENT, BROWSER_AGENT)
            .json(&LoginRequest {
                username: &self.username,
                password: &self.password,
            })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SyncError::Auth(format!(
                "{} returned {}",
                self.endpoints.login_url,
                resp.status()
            )));
        }

        let page = self
            .client
            .get(&self.endpoints.sso_url)
            .header(USER_AGENT, BROWSER_AGENT)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let form = SamlForm::parse(&page)?;
        let mut params = vec![("SAMLResponse", form.saml_response)];
        if let Some(relay_state) = form.relay_state {
            params.push(("RelayState", relay_state));
        }
        self.client
            .post(&form.action)
            .header(USER_AGENT, BROWSER_AGENT)
            .form(&params)
            .send()
            .await?
            .error_for_status()?;

        let token: TokenResponse = self
            .client
            .post(self.endpoints.token_url())
            .header(USER_AGENT, BROWSER_AGENT)
            .header(ACCEPT, "application/json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        self.access_token = Some(token.session_token);
        info!("logged in");
        Ok(())
    }

    async fn customer_id(&self) -> Result<String, SyncError> {
        let resp: CustomersResponse = self
            .get(self.endpoints.customers_url())?
            .header(ACCEPT, "application/json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        match resp.customers.as_slice() {
            [customer] => Ok(customer.uuid.clone()),
            xs => Err(SyncError::Config(format!(
                "expected one customer for {}, found {}",
                self.username,
                xs.len()
            ))),
        }
    }

    async fn usage_export(
        &self,
        customer_id: &str,
        start: Date,
        end: Date,
    ) -> Result<Vec<u8>, SyncError> {
        let url = self.endpoints.usage_export_url(customer_id, start, end);
        let bytes = self
            .get(url)?
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }
}
