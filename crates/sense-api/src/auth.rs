// Sense authentication
//
// Primary credential login, the TOTP second step, and refresh-token renewal.
// All three endpoints answer with the same `AuthResponse` shape and are
// posted as forms without a bearer header.

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::client::SenseClient;
use crate::error::Error;
use crate::models::{AuthResponse, MFA_TYPE_TOTP};
use crate::token::{Token, TotpProvider};

impl SenseClient {
    /// Log in with email and password.
    ///
    /// `POST /authenticate`. If the account has MFA enabled the service
    /// answers with an `mfa_required` challenge; `totp` is then asked for a
    /// code and the challenge is completed via [`complete_mfa`](Self::complete_mfa).
    /// Only the `totp` method is supported.
    pub async fn login(
        &self,
        email: &str,
        password: &SecretString,
        totp: &dyn TotpProvider,
    ) -> Result<(), Error> {
        let url = self.endpoint("authenticate")?;
        debug!(email, "authenticating");

        let res: AuthResponse = self
            .post_form(
                url,
                &[("email", email), ("password", password.expose_secret())],
            )
            .await?;

        if res.authorized {
            return self.accept(res);
        }

        if res.is_mfa_required() {
            let method = res.mfa_type.clone().unwrap_or_default();
            if method != MFA_TYPE_TOTP {
                return Err(Error::UnsupportedMfa { method });
            }
            let mfa_token = res.mfa_token.ok_or_else(|| Error::Authentication {
                message: "MFA challenge did not include an mfa_token".into(),
            })?;

            debug!("MFA challenge received, requesting TOTP code");
            let code = totp.totp_code()?;
            return self.complete_mfa(&mfa_token, &code).await;
        }

        Err(Error::Authentication {
            message: res.rejection_reason(),
        })
    }

    /// Answer an MFA challenge with a TOTP code.
    ///
    /// `POST /authenticate/mfa`. `mfa_token` is the short-lived challenge
    /// token from the primary login response.
    pub async fn complete_mfa(&self, mfa_token: &str, code: &SecretString) -> Result<(), Error> {
        let url = self.endpoint("authenticate/mfa")?;

        let res: AuthResponse = self
            .post_form(
                url,
                &[("mfaToken", mfa_token), ("totp", code.expose_secret())],
            )
            .await?;

        if res.authorized {
            self.accept(res)
        } else {
            Err(Error::Authentication {
                message: res.rejection_reason(),
            })
        }
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// `POST /renew`. Only the refresh token has to be valid, so this works
    /// after the access token has expired or been cleared. Identifiers the
    /// response omits are carried over from the previous token.
    pub async fn renew(&self) -> Result<(), Error> {
        let (refresh, user_id) = {
            let token = self.token().ok_or(Error::NotAuthenticated)?;
            (token.refresh_token, token.user_id)
        };

        let url = self.endpoint("renew")?;
        let user_id = user_id.to_string();

        let res: AuthResponse = self
            .post_form(
                url,
                &[
                    ("refresh_token", refresh.expose_secret()),
                    ("user_id", &user_id),
                    ("is_access_token", "true"),
                ],
            )
            .await?;

        let reason = res.rejection_reason();
        let Some(access) = res.access_token else {
            return Err(Error::Authentication { message: reason });
        };

        let mut guard = self.write_token();
        let token = guard.as_mut().ok_or(Error::NotAuthenticated)?;
        token.access_token = SecretString::from(access);
        if let Some(refresh) = res.refresh_token {
            token.refresh_token = SecretString::from(refresh);
        }
        if let Some(user_id) = res.user_id {
            token.user_id = user_id;
        }
        if let Some(account_id) = res.account_id {
            token.account_id = account_id;
        }
        if let Some(monitor) = res.monitors.first() {
            token.monitor_id = Some(monitor.id);
        }

        info!(user_id = token.user_id, "access token renewed");
        Ok(())
    }

    /// Store the token from an authorized response.
    fn accept(&self, res: AuthResponse) -> Result<(), Error> {
        let (Some(access), Some(refresh)) = (res.access_token, res.refresh_token) else {
            return Err(Error::Authentication {
                message: "authorized response did not include tokens".into(),
            });
        };

        let monitor_id = res.monitors.first().map(|m| m.id);
        let token = Token {
            access_token: SecretString::from(access),
            refresh_token: SecretString::from(refresh),
            user_id: res.user_id.unwrap_or_default(),
            account_id: res.account_id.unwrap_or_default(),
            monitor_id,
        };

        info!(user_id = token.user_id, ?monitor_id, "authenticated");
        self.set_token(token);
        Ok(())
    }
}
