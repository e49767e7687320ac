//! End-to-end scenarios at the orchestrator level: happy path, version
//! negotiation, pairing, issuance with keyshare proofs, expiry, cancellation
//! and chained sessions.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use irma_messages::{
    Action, AttributeConDisCon, ClientToken, Disclosure, ErrorKind, FrontendOptionsRequest,
    IssueCommitmentMessage, NextSessionData, PairingMethod, ProofStatus, ProtocolVersion,
    SchemeManagerIdentifier, ServerStatus, SessionPackage,
};
use irma_sessions::test_utils::{
    disclosure_request, issuance_request, test_configuration, MockCatalog, MockVerifier,
    RecordingSink,
};
use irma_sessions::{
    CallbackSink, Configuration, CredentialCatalog, MemorySessionStore, ProofVerifier,
    SessionGuard, SessionServer, SessionStore,
};

struct Harness {
    server: Arc<SessionServer>,
    sink: Arc<RecordingSink>,
}

fn harness_with(
    conf: Configuration,
    catalog: MockCatalog,
    verifier: MockVerifier,
    sink: RecordingSink,
) -> Harness {
    let sink = Arc::new(sink);
    let server = Arc::new(SessionServer::new(
        Arc::new(conf),
        Arc::new(MemorySessionStore::new()) as Arc<dyn SessionStore>,
        Arc::new(catalog) as Arc<dyn CredentialCatalog>,
        Arc::new(verifier) as Arc<dyn ProofVerifier>,
        sink.clone() as Arc<dyn CallbackSink>,
    ));
    Harness { server, sink }
}

fn harness(verifier: MockVerifier) -> Harness {
    harness_with(
        test_configuration(),
        MockCatalog::default(),
        verifier,
        RecordingSink::default(),
    )
}

fn client_token(package: &SessionPackage) -> ClientToken {
    let token = package.session_ptr.url.rsplit('/').next().unwrap();
    ClientToken::parse(token).unwrap()
}

/// Open a transaction, run async handler code against the session, write the
/// session back and commit, the way the middleware chain treats handlers.
macro_rules! transact {
    ($server:expr, $token:expr, |$session:ident| $body:expr) => {{
        let mut guard = $server.store().transaction($token).await.unwrap();
        let mut data = guard.session().clone();
        let out = {
            let $session = &mut data;
            $body
        };
        *guard.session() = data;
        guard.commit().await.unwrap();
        out
    }};
}

async fn wait_for_callback(sink: &RecordingSink) -> (String, irma_messages::SessionResult) {
    for _ in 0..100 {
        if let Some(entry) = sink.delivered.lock().last().cloned() {
            return entry;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("result callback was not delivered");
}

// ---------------------------------------------------------------------------
// Disclosure happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_disclosure_happy_path() {
    let h = harness(MockVerifier::valid(&[("pbdf.pbdf.email.email", "a@b.example")]));

    let package = h
        .server
        .start_session(
            disclosure_request("pbdf.pbdf.email.email"),
            AttributeConDisCon::default(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(package.session_ptr.session_type, Action::Disclosing);
    assert!(package
        .session_ptr
        .url
        .starts_with("https://irma.example.com/irma/session/"));
    assert_eq!(
        h.server.session_status(&package.token).await.unwrap(),
        ServerStatus::Initialized
    );

    let ct = client_token(&package);

    // Client fetches the request.
    let csr = transact!(h.server, &ct, |session| {
        h.server
            .client_get_request(session, ProtocolVersion::new(2, 4), ProtocolVersion::new(2, 8))
            .await
            .unwrap()
    });
    assert_eq!(csr.protocol_version, Some(ProtocolVersion::new(2, 8)));
    assert!(csr.request.is_some());
    assert_eq!(
        h.server.session_status(&package.token).await.unwrap(),
        ServerStatus::Connected
    );

    // Client posts valid proofs.
    let response = transact!(h.server, &ct, |session| {
        h.server
            .client_respond_disclosure(session, &Disclosure::default())
            .await
            .unwrap()
    });
    assert_eq!(response.proof_status, ProofStatus::Valid);

    let result = h.server.session_result(&package.token).await.unwrap();
    assert_eq!(result.status, ServerStatus::Done);
    assert_eq!(result.proof_status, Some(ProofStatus::Valid));
    let disclosed = result.disclosed.unwrap();
    assert_eq!(disclosed[0][0].id.as_str(), "pbdf.pbdf.email.email");
    assert_eq!(disclosed[0][0].raw_value.as_deref(), Some("a@b.example"));
}

#[tokio::test]
async fn test_invalid_proofs_cancel_session() {
    let h = harness(MockVerifier::invalid(ProofStatus::Invalid));
    let package = h
        .server
        .start_session(
            disclosure_request("pbdf.pbdf.email.email"),
            AttributeConDisCon::default(),
            None,
        )
        .await
        .unwrap();
    let ct = client_token(&package);

    transact!(h.server, &ct, |session| {
        h.server
            .client_get_request(session, ProtocolVersion::new(2, 4), ProtocolVersion::new(2, 8))
            .await
            .unwrap()
    });
    let response = transact!(h.server, &ct, |session| {
        h.server
            .client_respond_disclosure(session, &Disclosure::default())
            .await
            .unwrap()
    });
    assert_eq!(response.proof_status, ProofStatus::Invalid);

    let result = h.server.session_result(&package.token).await.unwrap();
    assert_eq!(result.status, ServerStatus::Cancelled);
    assert_eq!(result.proof_status, Some(ProofStatus::Invalid));
}

#[tokio::test]
async fn test_crypto_error_cancels_with_error_kind() {
    let h = harness(MockVerifier::failing(ErrorKind::Crypto));
    let package = h
        .server
        .start_session(
            disclosure_request("pbdf.pbdf.email.email"),
            AttributeConDisCon::default(),
            None,
        )
        .await
        .unwrap();
    let ct = client_token(&package);

    transact!(h.server, &ct, |session| {
        h.server
            .client_get_request(session, ProtocolVersion::new(2, 4), ProtocolVersion::new(2, 8))
            .await
            .unwrap()
    });
    transact!(h.server, &ct, |session| {
        let err = h
            .server
            .client_respond_disclosure(session, &Disclosure::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Crypto);
    });

    let result = h.server.session_result(&package.token).await.unwrap();
    assert_eq!(result.status, ServerStatus::Cancelled);
    assert_eq!(result.err.unwrap().error_name, "crypto");
}

// ---------------------------------------------------------------------------
// Version negotiation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_version_mismatch_cancels_session() {
    let h = harness(MockVerifier::valid(&[]));
    let package = h
        .server
        .start_session(
            disclosure_request("pbdf.pbdf.email.email"),
            AttributeConDisCon::default(),
            None,
        )
        .await
        .unwrap();
    let ct = client_token(&package);

    transact!(h.server, &ct, |session| {
        let err = h
            .server
            .client_get_request(session, ProtocolVersion::new(1, 0), ProtocolVersion::new(1, 3))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProtocolVersionNotSupported);
    });

    let result = h.server.session_result(&package.token).await.unwrap();
    assert_eq!(result.status, ServerStatus::Cancelled);
    assert_eq!(
        result.err.unwrap().error_name,
        "protocolVersionNotSupported"
    );
}

#[tokio::test]
async fn test_revocation_raises_version_floor() {
    // Effective minimum is 2.6 when nonrevocation proofs are required.
    let mut rrequest = disclosure_request("pbdf.pbdf.email.email");
    rrequest.request.base_mut().revocation = vec!["pbdf.pbdf.email".into()];

    let h = harness(MockVerifier::valid(&[]));
    let package = h
        .server
        .start_session(rrequest.clone(), AttributeConDisCon::default(), None)
        .await
        .unwrap();
    let ct = client_token(&package);

    // A client capped at 2.5 cannot join.
    transact!(h.server, &ct, |session| {
        let err = h
            .server
            .client_get_request(session, ProtocolVersion::new(2, 5), ProtocolVersion::new(2, 5))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProtocolVersionNotSupported);
    });
    assert_eq!(
        h.server.session_status(&package.token).await.unwrap(),
        ServerStatus::Cancelled
    );

    // A client reaching 2.7 negotiates 2.7.
    let package = h
        .server
        .start_session(rrequest, AttributeConDisCon::default(), None)
        .await
        .unwrap();
    let ct = client_token(&package);
    let csr = transact!(h.server, &ct, |session| {
        h.server
            .client_get_request(session, ProtocolVersion::new(2, 4), ProtocolVersion::new(2, 7))
            .await
            .unwrap()
    });
    assert_eq!(csr.protocol_version, Some(ProtocolVersion::new(2, 7)));
}

// ---------------------------------------------------------------------------
// Pairing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_pairing_flow() {
    let h = harness(MockVerifier::valid(&[("pbdf.pbdf.email.email", "a@b.example")]));
    let package = h
        .server
        .start_session(
            disclosure_request("pbdf.pbdf.email.email"),
            AttributeConDisCon::default(),
            None,
        )
        .await
        .unwrap();
    let ct = client_token(&package);

    // Frontend enables pin pairing before the client connects.
    let options = transact!(h.server, &ct, |session| {
        session
            .update_frontend_options(&FrontendOptionsRequest {
                pairing_method: Some(PairingMethod::Pin),
            })
            .unwrap()
    });
    assert_eq!(options.pairing_method, PairingMethod::Pin);
    assert_eq!(options.pairing_code.unwrap().len(), 8);

    // The client connects and must wait for pairing; the request is withheld.
    let csr = transact!(h.server, &ct, |session| {
        h.server
            .client_get_request(session, ProtocolVersion::new(2, 4), ProtocolVersion::new(2, 8))
            .await
            .unwrap()
    });
    assert!(csr.request.is_none());
    assert_eq!(
        h.server.session_status(&package.token).await.unwrap(),
        ServerStatus::Pairing
    );

    // Posting proofs while pairing is refused.
    transact!(h.server, &ct, |session| {
        let err = h
            .server
            .client_respond_disclosure(session, &Disclosure::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnexpectedRequest);
    });

    // Frontend confirms the pairing; the session proceeds as usual.
    transact!(h.server, &ct, |session| {
        session.pairing_completed().unwrap()
    });
    assert_eq!(
        h.server.session_status(&package.token).await.unwrap(),
        ServerStatus::Connected
    );
    let response = transact!(h.server, &ct, |session| {
        h.server
            .client_respond_disclosure(session, &Disclosure::default())
            .await
            .unwrap()
    });
    assert_eq!(response.proof_status, ProofStatus::Valid);
}

// ---------------------------------------------------------------------------
// Issuance
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_issuance_with_keyshare_proofs() {
    let mut catalog = MockCatalog::default();
    catalog.keyshare_schemes = vec![SchemeManagerIdentifier::from("pbdf")];
    let h = harness_with(
        test_configuration(),
        catalog,
        MockVerifier::valid(&[]),
        RecordingSink::default(),
    );

    let package = h
        .server
        .start_session(
            issuance_request("pbdf.pbdf.email"),
            AttributeConDisCon::default(),
            None,
        )
        .await
        .unwrap();
    let ct = client_token(&package);
    // The frontend is hinted to recommend pairing for issuance.
    assert_eq!(package.frontend_request.pairing_hint, Some(true));

    transact!(h.server, &ct, |session| {
        let csr = h
            .server
            .client_get_request(session, ProtocolVersion::new(2, 4), ProtocolVersion::new(2, 8))
            .await
            .unwrap();
        // Issuance credentials got their key counter assigned at creation.
        match csr.request.unwrap() {
            irma_messages::SessionRequest::Issuance(isreq) => {
                assert_eq!(isreq.credentials[0].key_counter, Some(2));
                assert!(isreq.credentials[0].validity.is_some());
            }
            _ => panic!("expected issuance request"),
        }
    });

    // Commitments without the keyshare proof are refused and cancel the
    // session.
    transact!(h.server, &ct, |session| {
        let err = h
            .server
            .client_respond_issuance(session, &IssueCommitmentMessage::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Keyshare);
    });
    assert_eq!(
        h.server.session_status(&package.token).await.unwrap(),
        ServerStatus::Cancelled
    );

    // Fresh session with the proof JWT included.
    let package = h
        .server
        .start_session(
            issuance_request("pbdf.pbdf.email"),
            AttributeConDisCon::default(),
            None,
        )
        .await
        .unwrap();
    let ct = client_token(&package);
    transact!(h.server, &ct, |session| {
        h.server
            .client_get_request(session, ProtocolVersion::new(2, 4), ProtocolVersion::new(2, 8))
            .await
            .unwrap()
    });
    let mut commitments = IssueCommitmentMessage::default();
    commitments
        .proof_p_jwts
        .insert("pbdf".to_string(), "proof-jwt".to_string());
    let response = transact!(h.server, &ct, |session| {
        let response = h
            .server
            .client_respond_issuance(session, &commitments)
            .await
            .unwrap();
        // The verified proof is cached on the session.
        assert!(session
            .kss_proofs
            .contains_key(&SchemeManagerIdentifier::from("pbdf")));
        response
    });
    assert_eq!(response.proof_status, ProofStatus::Valid);
    assert_eq!(response.issue_signatures.unwrap().len(), 1);
    assert_eq!(
        h.server.session_status(&package.token).await.unwrap(),
        ServerStatus::Done
    );
}

#[tokio::test]
async fn test_expired_issuer_key_rejected_at_creation() {
    let mut catalog = MockCatalog::default();
    catalog.key_expiry = SystemTime::now() - Duration::from_secs(1);
    let h = harness_with(
        test_configuration(),
        catalog,
        MockVerifier::valid(&[]),
        RecordingSink::default(),
    );

    let err = h
        .server
        .start_session(
            issuance_request("pbdf.pbdf.email"),
            AttributeConDisCon::default(),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidRequest);
}

// ---------------------------------------------------------------------------
// Expiry (sweep)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sweep_times_out_and_later_deletes() {
    let h = harness(MockVerifier::valid(&[]));
    let mut rrequest = disclosure_request("pbdf.pbdf.email.email");
    rrequest.timeout = 60;
    rrequest.callback_url = Some("https://requestor.example.com/callback".to_string());

    let package = h
        .server
        .start_session(rrequest, AttributeConDisCon::default(), None)
        .await
        .unwrap();
    let ct = client_token(&package);

    // No client connects for 61 seconds.
    transact!(h.server, &ct, |session| {
        session.last_active = SystemTime::now() - Duration::from_secs(61);
    });

    h.server.sweep_expired().await;
    assert_eq!(
        h.server.session_status(&package.token).await.unwrap(),
        ServerStatus::Timeout
    );
    let result = h.server.session_result(&package.token).await.unwrap();
    assert_eq!(result.status, ServerStatus::Timeout);

    // The timeout was reported to the requestor's callback URL.
    let (url, delivered) = wait_for_callback(&h.sink).await;
    assert_eq!(url, "https://requestor.example.com/callback");
    assert_eq!(delivered.status, ServerStatus::Timeout);

    // A sweep within the result lifetime keeps the session around.
    h.server.sweep_expired().await;
    assert!(h.server.session_status(&package.token).await.is_ok());

    // Once the result lifetime has elapsed, the sweep deletes it and the
    // session becomes unknown.
    transact!(h.server, &ct, |session| {
        session.last_active = SystemTime::now() - Duration::from_secs(6 * 60);
    });
    h.server.sweep_expired().await;
    let err = h.server.session_status(&package.token).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::SessionUnknown);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_requestor_cancel_reports_callback() {
    let h = harness(MockVerifier::valid(&[]));
    let mut rrequest = disclosure_request("pbdf.pbdf.email.email");
    rrequest.callback_url = Some("https://requestor.example.com/callback".to_string());

    let package = h
        .server
        .start_session(rrequest, AttributeConDisCon::default(), None)
        .await
        .unwrap();

    h.server.cancel_session(&package.token).await.unwrap();
    assert_eq!(
        h.server.session_status(&package.token).await.unwrap(),
        ServerStatus::Cancelled
    );

    let (_, delivered) = wait_for_callback(&h.sink).await;
    assert_eq!(delivered.status, ServerStatus::Cancelled);

    // Cancelling a finished session changes nothing.
    h.server.cancel_session(&package.token).await.unwrap();
    assert_eq!(
        h.server.session_status(&package.token).await.unwrap(),
        ServerStatus::Cancelled
    );
}

// ---------------------------------------------------------------------------
// Chained sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_chained_session_issues_fresh_qr() {
    let sink = RecordingSink::with_next(issuance_request("pbdf.pbdf.email"));
    let h = harness_with(
        test_configuration(),
        MockCatalog::default(),
        MockVerifier::valid(&[("pbdf.pbdf.email.email", "a@b.example")]),
        sink,
    );

    let mut rrequest = disclosure_request("pbdf.pbdf.email.email");
    rrequest.next_session = Some(NextSessionData {
        url: "https://requestor.example.com/next".to_string(),
        session_type: Some(Action::Issuing),
    });

    let package = h
        .server
        .start_session(rrequest, AttributeConDisCon::default(), None)
        .await
        .unwrap();
    let ct = client_token(&package);

    // Chained sessions require protocol 2.7; the client reaches it.
    let csr = transact!(h.server, &ct, |session| {
        h.server
            .client_get_request(session, ProtocolVersion::new(2, 4), ProtocolVersion::new(2, 8))
            .await
            .unwrap()
    });
    assert_eq!(csr.protocol_version, Some(ProtocolVersion::new(2, 8)));

    let response = transact!(h.server, &ct, |session| {
        h.server
            .client_respond_disclosure(session, &Disclosure::default())
            .await
            .unwrap()
    });
    let next_qr = response.next_session.unwrap();
    assert_eq!(next_qr.session_type, Action::Issuing);

    // The follow-up session is a real session of its own, sharing no state
    // with its parent.
    let next_ct = ClientToken::parse(next_qr.url.rsplit('/').next().unwrap()).unwrap();
    assert_ne!(next_ct, ct);
    let next_session = h.server.store().client_get(&next_ct).await.unwrap().unwrap();
    assert_eq!(next_session.status, ServerStatus::Initialized);
    assert_eq!(next_session.action, Action::Issuing);
    assert!(next_session.implicit_disclosure.is_empty());

    // The parent result carries the pointer too.
    let result = h.server.session_result(&package.token).await.unwrap();
    assert_eq!(result.status, ServerStatus::Done);
    assert_eq!(result.next_session.unwrap().session_type, Action::Issuing);

    // A mismatch between announced and fetched type fails the parent.
    let sink = RecordingSink::with_next(issuance_request("pbdf.pbdf.email"));
    let h = harness_with(
        test_configuration(),
        MockCatalog::default(),
        MockVerifier::valid(&[]),
        sink,
    );
    let mut rrequest = disclosure_request("pbdf.pbdf.email.email");
    rrequest.next_session = Some(NextSessionData {
        url: "https://requestor.example.com/next".to_string(),
        session_type: Some(Action::Disclosing),
    });
    let package = h
        .server
        .start_session(rrequest, AttributeConDisCon::default(), None)
        .await
        .unwrap();
    let ct = client_token(&package);
    transact!(h.server, &ct, |session| {
        h.server
            .client_get_request(session, ProtocolVersion::new(2, 4), ProtocolVersion::new(2, 8))
            .await
            .unwrap()
    });
    transact!(h.server, &ct, |session| {
        let err = h
            .server
            .client_respond_disclosure(session, &Disclosure::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    });
    assert_eq!(
        h.server.session_status(&package.token).await.unwrap(),
        ServerStatus::Cancelled
    );
}

// ---------------------------------------------------------------------------
// Implicit disclosure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_implicit_disclosure_strengthens_verification() {
    let h = harness(MockVerifier::valid(&[]));
    let implicit: AttributeConDisCon = AttributeConDisCon(vec![vec![vec![
        irma_messages::AttributeRequest::new("pbdf.pbdf.mobilenumber.mobilenumber"),
    ]]]);

    let package = h
        .server
        .start_session(
            disclosure_request("pbdf.pbdf.email.email"),
            implicit.clone(),
            None,
        )
        .await
        .unwrap();
    let ct = client_token(&package);

    let session = h.server.store().client_get(&ct).await.unwrap().unwrap();
    assert_eq!(session.implicit_disclosure, implicit);
    // The verification request contains both conjunctions, the client-visible
    // request only the requestor's.
    assert_eq!(session.verification_request().disclose().0.len(), 2);
    assert_eq!(session.client_visible_request().disclose().0.len(), 1);
}
