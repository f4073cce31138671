//! Assertion consumer: validates an IdP Response and maps it to a principal.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::{
    error::{SamlError, SamlResult},
    principal::UserPrincipal,
    signature::SignatureVerifier,
    types::{Assertion, Response, STATUS_SUCCESS},
    xml::XmlParserPool,
};
use crate::auth::session_store::SessionState;

/// Default maximum age of an assertion's authentication instant.
pub const DEFAULT_ASSERTION_VALIDITY_SECS: u64 = 30 * 60;

/// Consumes `samlp:Response` messages delivered to the ACS endpoint.
#[derive(Debug, Clone)]
pub struct AssertionConsumer {
    verifier: SignatureVerifier,
    pool: Arc<XmlParserPool>,
    validity: Duration,
}

impl AssertionConsumer {
    pub fn new(verifier: SignatureVerifier, pool: Arc<XmlParserPool>, validity: Duration) -> Self {
        Self {
            verifier,
            pool,
            validity,
        }
    }

    /// Validate `response_xml` and record the consumed assertion in `session`.
    pub fn consume(
        &self,
        response_xml: &str,
        session: &mut SessionState,
    ) -> SamlResult<UserPrincipal> {
        self.consume_at(response_xml, session, Utc::now())
    }

    /// [`consume`](Self::consume) against an explicit clock.
    pub fn consume_at(
        &self,
        response_xml: &str,
        session: &mut SessionState,
        now: DateTime<Utc>,
    ) -> SamlResult<UserPrincipal> {
        let response = Response::parse(&self.pool, response_xml)?;
        tracing::debug!(
            response_id = %response.id,
            in_response_to = response.in_response_to.as_deref().unwrap_or(""),
            issuer = response.issuer.as_ref().map(|i| i.value.as_str()).unwrap_or(""),
            "Consuming SAML response"
        );
        if let Some(status) = response.status_code.as_deref()
            && status != STATUS_SUCCESS
        {
            tracing::warn!(response_id = %response.id, status, "IdP returned a non-success status");
        }

        self.verify_signature(&response)?;

        let assertion = response.first_assertion()?;
        self.check_freshness(assertion, now)?;

        let statement = assertion
            .attribute_statement
            .as_ref()
            .ok_or(SamlError::MissingElement("AttributeStatement"))?;
        let principal = UserPrincipal::from_attributes(&statement.attributes);

        tracing::debug!(assertion_id = %assertion.id, xml = %assertion.xml, "Consumed SAML assertion");
        session.idp_saml_string = Some(assertion.xml.clone());
        session.idp_token = Some(assertion.id.clone());
        session.name_id = assertion
            .subject_name_id
            .as_ref()
            .map(|name_id| name_id.value.clone());

        Ok(principal)
    }

    /// A signed Response covers its assertions. Otherwise the first
    /// assertion must carry its own signature.
    fn verify_signature(&self, response: &Response) -> SamlResult<()> {
        if SignatureVerifier::is_signed(&response.element) {
            return self.verifier.verify(&response.element);
        }
        match response.first_assertion_element() {
            Some(assertion) if SignatureVerifier::is_signed(assertion) => {
                self.verifier.verify(assertion)
            }
            _ => Err(SamlError::SignatureValidation(
                "neither the response nor its assertion is signed".to_string(),
            )),
        }
    }

    /// Passes while `now` is at most `validity` after the first
    /// AuthnStatement's instant. The bound itself still passes; a deadline
    /// that cannot be represented fails.
    fn check_freshness(&self, assertion: &Assertion, now: DateTime<Utc>) -> SamlResult<()> {
        let statement = assertion
            .authn_statement
            .as_ref()
            .ok_or(SamlError::MissingElement("AuthnStatement"))?;
        let expired = statement
            .authn_instant
            .checked_add_signed(self.validity)
            .is_none_or(|deadline| now > deadline);
        if expired {
            return Err(SamlError::CredentialsExpired(format!(
                "authentication at {} is older than {} minutes",
                statement.authn_instant,
                self.validity.num_minutes()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use chrono::TimeZone;
    use rstest::rstest;

    use super::*;
    use crate::saml::{
        signature::{EmbeddedCertificate, PinnedCertificate},
        test_support::{
            EXTERNAL_IDP_CERTIFICATE, EXTERNAL_SIGNED_RESPONSE, IDP_ENTITY_ID, ResponseFixture,
            TestIdp, sign_element,
        },
    };

    fn consumer(idp: &TestIdp) -> AssertionConsumer {
        let verifier = SignatureVerifier::new(Arc::new(
            PinnedCertificate::new(&idp.certificate_pem()).unwrap(),
        ));
        AssertionConsumer::new(verifier, Arc::default(), validity())
    }

    fn validity() -> Duration {
        Duration::seconds(DEFAULT_ASSERTION_VALIDITY_SECS as i64)
    }

    fn session() -> SessionState {
        SessionState::new(StdDuration::from_secs(1800))
    }

    #[test]
    fn test_consume_maps_principal_and_records_session() {
        let idp = TestIdp::rsa();
        let xml = ResponseFixture::new("_assertion1").signed_by(&idp);
        let mut session = session();

        let principal = consumer(&idp).consume(&xml, &mut session).unwrap();

        assert_eq!(principal.username, "alice");
        assert_eq!(principal.email, "a@x.com");
        assert_eq!(principal.personname, "Alice A");
        assert_eq!(session.idp_token.as_deref(), Some("_assertion1"));
        assert_eq!(session.name_id.as_deref(), Some("alice"));
        let stored = session.idp_saml_string.unwrap();
        assert!(stored.starts_with("<saml:Assertion"));
        assert!(stored.contains(r#"ID="_assertion1""#));
    }

    #[test]
    fn test_assertion_level_signature_is_accepted() {
        let idp = TestIdp::rsa();
        let xml = ResponseFixture::new("_assertion2").assertion_signed_by(&idp);
        let principal = consumer(&idp).consume(&xml, &mut session()).unwrap();
        assert_eq!(principal.username, "alice");
    }

    #[test]
    fn test_unsigned_response_is_rejected() {
        let idp = TestIdp::rsa();
        let xml = ResponseFixture::new("_assertion3").to_xml();
        let mut session = session();

        let err = consumer(&idp).consume(&xml, &mut session).unwrap_err();
        assert!(matches!(err, SamlError::SignatureValidation(_)));
        assert!(session.idp_token.is_none());
    }

    #[test]
    fn test_response_signed_by_unknown_idp_is_rejected() {
        let idp = TestIdp::rsa();
        let attacker = TestIdp::rsa();
        let xml = ResponseFixture::new("_assertion4").signed_by(&attacker);

        let err = consumer(&idp).consume(&xml, &mut session()).unwrap_err();
        assert!(matches!(err, SamlError::SignatureValidation(_)));

        // The self-asserted policy accepts whatever key the message carries.
        let embedded = AssertionConsumer::new(
            SignatureVerifier::new(Arc::new(EmbeddedCertificate)),
            Arc::default(),
            validity(),
        );
        assert!(embedded.consume(&xml, &mut session()).is_ok());
    }

    #[rstest]
    #[case::fresh(29 * 60, true)]
    #[case::at_boundary(30 * 60, true)]
    #[case::one_second_late(30 * 60 + 1, false)]
    #[case::stale(31 * 60, false)]
    fn test_freshness(#[case] age_secs: i64, #[case] accepted: bool) {
        let idp = TestIdp::rsa();
        let now = Utc::now();
        let authn_instant = now - Duration::seconds(age_secs);
        // Whole seconds keep the boundary exact after millisecond rendering.
        let authn_instant =
            authn_instant - Duration::nanoseconds(authn_instant.timestamp_subsec_nanos().into());
        let now = authn_instant + Duration::seconds(age_secs);
        let xml = ResponseFixture::new("_fresh")
            .authn_instant(authn_instant)
            .signed_by(&idp);

        let result = consumer(&idp).consume_at(&xml, &mut session(), now);
        if accepted {
            assert!(result.is_ok(), "expected success, got {result:?}");
        } else {
            assert!(matches!(result, Err(SamlError::CredentialsExpired(_))));
        }
    }

    #[test]
    fn test_unrepresentable_deadline_is_expired() {
        let idp = TestIdp::rsa();
        let xml = ResponseFixture::new("_forever").signed_by(&idp);
        let consumer = AssertionConsumer::new(
            SignatureVerifier::new(Arc::new(
                PinnedCertificate::new(&idp.certificate_pem()).unwrap(),
            )),
            Arc::default(),
            Duration::MAX,
        );

        let err = consumer.consume(&xml, &mut session()).unwrap_err();
        assert!(matches!(err, SamlError::CredentialsExpired(_)));
    }

    #[test]
    fn test_crlf_line_endings_verify() {
        let idp = TestIdp::rsa();
        let xml = ResponseFixture::new("_crlf").signed_by(&idp).replace('\n', "\r\n");
        let principal = consumer(&idp).consume(&xml, &mut session()).unwrap();
        assert_eq!(principal.username, "alice");
    }

    #[test]
    fn test_response_signed_elsewhere_is_accepted() {
        let verifier = SignatureVerifier::new(Arc::new(
            PinnedCertificate::new(EXTERNAL_IDP_CERTIFICATE).unwrap(),
        ));
        let consumer = AssertionConsumer::new(verifier, Arc::default(), validity());
        let authn_instant = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut session = session();

        let principal = consumer
            .consume_at(
                EXTERNAL_SIGNED_RESPONSE,
                &mut session,
                authn_instant + Duration::minutes(5),
            )
            .unwrap();

        assert_eq!(principal.username, "alice");
        assert_eq!(principal.personname, "Alice > Bob");
        assert_eq!(principal.email, "");
        assert_eq!(session.idp_token.as_deref(), Some("_kat_assertion"));

        let tampered =
            EXTERNAL_SIGNED_RESPONSE.replace(">alice</saml:NameID>", ">mallory</saml:NameID>");
        let err = consumer
            .consume_at(&tampered, &mut session, authn_instant)
            .unwrap_err();
        assert!(matches!(err, SamlError::SignatureValidation(_)));
    }

    #[test]
    fn test_only_first_assertion_and_statements_are_read() {
        let idp = TestIdp::rsa();
        let xml = ResponseFixture::new("_first")
            .extra_statements(
                r#"<saml:AuthnStatement/><saml:AttributeStatement><saml:Attribute Name="idpuserid"><saml:AttributeValue>mallory</saml:AttributeValue></saml:Attribute></saml:AttributeStatement>"#,
            )
            .extra_assertions(r#"<saml:Assertion ID="_second"><saml:AuthnStatement/></saml:Assertion>"#)
            .signed_by(&idp);
        let mut session = session();

        let principal = consumer(&idp).consume(&xml, &mut session).unwrap();

        assert_eq!(principal.username, "alice");
        assert_eq!(session.idp_token.as_deref(), Some("_first"));
    }

    #[test]
    fn test_missing_assertion_is_rejected() {
        let idp = TestIdp::rsa();
        let xml = sign_element(
            &idp,
            &format!(
                r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_response" Version="2.0" IssueInstant="2024-01-01T00:00:00Z"><saml:Issuer>{IDP_ENTITY_ID}</saml:Issuer></samlp:Response>"#
            ),
            "_response",
        );
        let err = consumer(&idp).consume(&xml, &mut session()).unwrap_err();
        assert!(matches!(err, SamlError::MissingElement("Assertion")));
    }

    #[test]
    fn test_malformed_xml_is_rejected() {
        let idp = TestIdp::rsa();
        let err = consumer(&idp)
            .consume("<samlp:Response", &mut session())
            .unwrap_err();
        assert!(matches!(err, SamlError::Xml(_)));
    }
}
