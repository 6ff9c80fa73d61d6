//! Derived request state.
//!
//! Everything here is a pure function of the stored `Request`: aggregate
//! status, per-service counters and the status view each audience receives.
//! The engine keeps the last view sent to every node and emits only when a
//! freshly rendered view differs.

use crate::models::{
    BlockHeight, CallbackEvent, Request, RequestMode, RequestStatus, RequestStatusEvent,
    ResponseStatus, ResponseValidity, ServiceStatus,
};

/// Who a status view is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Requester,
    Idp,
    As,
}

/// A status view minus its destination and block height.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub status: RequestStatus,
    pub mode: RequestMode,
    pub min_idp: u32,
    pub answered_idp_count: u32,
    pub closed: bool,
    pub timed_out: bool,
    pub service_list: Vec<ServiceStatus>,
    pub response_valid_list: Vec<ResponseValidity>,
}

impl StatusSnapshot {
    pub fn into_event(self, node_id: &str, request: &Request, height: &BlockHeight) -> CallbackEvent {
        CallbackEvent::RequestStatus(RequestStatusEvent {
            node_id: node_id.to_string(),
            request_id: request.request_id.clone(),
            requester_node_id: request.requester_node_id.clone(),
            status: self.status,
            mode: self.mode,
            min_idp: self.min_idp,
            answered_idp_count: self.answered_idp_count,
            closed: self.closed,
            timed_out: self.timed_out,
            service_list: self.service_list,
            response_valid_list: self.response_valid_list,
            block_height: height.clone(),
        })
    }
}

pub fn valid_accept_count(request: &Request) -> usize {
    request
        .responses
        .iter()
        .filter(|r| r.is_valid_accept())
        .count()
}

/// `min_idp` valid accepts exist.
pub fn idp_threshold_met(request: &Request) -> bool {
    valid_accept_count(request) >= request.min_idp as usize
}

pub fn all_services_satisfied(request: &Request) -> bool {
    request.service_data.iter().all(|s| s.is_satisfied())
}

/// Status implied by the recorded responses and data. Callers combine it
/// with the stored status through `max`.
pub fn compute_status(request: &Request) -> RequestStatus {
    if idp_threshold_met(request) && all_services_satisfied(request) {
        RequestStatus::Completed
    } else if valid_accept_count(request) >= 1 {
        RequestStatus::Confirmed
    } else {
        RequestStatus::Pending
    }
}

/// Every notified IdP answered and the threshold can no longer be reached.
pub fn consent_exhausted(request: &Request) -> bool {
    let outstanding = request
        .notified_idp_list
        .iter()
        .filter(|idp| request.response_from(idp).is_none())
        .count();
    valid_accept_count(request) + outstanding < request.min_idp as usize
}

pub fn service_list(request: &Request) -> Vec<ServiceStatus> {
    request
        .service_data
        .iter()
        .map(|entry| ServiceStatus {
            service_id: entry.service_id.clone(),
            min_as: entry.min_as,
            signed_data_count: entry.signed_data_count(),
            received_data_count: entry.received_data_count(),
        })
        .collect()
}

pub fn response_valid_list(request: &Request, audience: Audience) -> Vec<ResponseValidity> {
    let hide = audience == Audience::Idp || request.mode == RequestMode::One;
    request
        .responses
        .iter()
        .map(|response| ResponseValidity {
            idp_id: response.idp_id.clone(),
            valid_signature: if hide { None } else { response.valid_signature },
            valid_ial: if hide { None } else { response.valid_ial },
        })
        .collect()
}

pub fn snapshot(request: &Request, audience: Audience) -> StatusSnapshot {
    StatusSnapshot {
        status: request.status,
        mode: request.mode,
        min_idp: request.min_idp,
        answered_idp_count: request.responses.len() as u32,
        closed: request.closed,
        timed_out: request.timed_out,
        service_list: service_list(request),
        response_valid_list: response_valid_list(request, audience),
    }
}

/// Highest IAL and AAL among valid accepts.
pub fn accepted_assurance(request: &Request) -> (f64, f64) {
    request
        .responses
        .iter()
        .filter(|r| r.is_valid_accept())
        .fold((0.0, 0.0), |(ial, aal), r| (ial.max(r.ial), aal.max(r.aal)))
}

/// Signatures of the valid accepts, forwarded to ASes with the data request.
pub fn response_signatures(request: &Request) -> Vec<String> {
    request
        .responses
        .iter()
        .filter(|r| r.is_valid_accept() && r.status == ResponseStatus::Accept)
        .filter_map(|r| r.signature.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IdpResponse, RequestPurpose, ServiceDataEntry};

    fn request(mode: RequestMode, min_idp: u32) -> Request {
        Request {
            request_id: "req-1".to_string(),
            purpose: RequestPurpose::Verify,
            mode,
            requester_node_id: "rp1".to_string(),
            reference_id: "ref-1".to_string(),
            namespace: None,
            identifier: None,
            reference_group_code: None,
            min_idp,
            min_ial: 1.1,
            min_aal: 1.0,
            request_timeout: 60,
            idp_id_list: vec![],
            notified_idp_list: vec!["idp1".to_string(), "idp2".to_string()],
            data_request_list: vec![],
            request_message: "hello".to_string(),
            initial_salt: String::new(),
            request_message_salt: "salt".to_string(),
            request_message_hash: "hash".to_string(),
            creation_time: 0,
            creation_block_height: BlockHeight::new("c", 1),
            status: RequestStatus::Pending,
            closed: false,
            timed_out: false,
            responses: vec![],
            service_data: vec![],
            data_requested: false,
            identity_change: None,
        }
    }

    fn response(idp_id: &str, status: ResponseStatus, valid: Option<bool>) -> IdpResponse {
        IdpResponse {
            idp_id: idp_id.to_string(),
            ial: 2.3,
            aal: 3.0,
            status,
            accessor_id: None,
            signature: Some("sig".to_string()),
            valid_signature: valid,
            valid_ial: valid,
            block_height: BlockHeight::new("c", 2),
        }
    }

    #[test]
    fn test_status_progression() {
        let mut req = request(RequestMode::Two, 2);
        assert_eq!(compute_status(&req), RequestStatus::Pending);

        req.responses
            .push(response("idp1", ResponseStatus::Accept, Some(true)));
        assert_eq!(compute_status(&req), RequestStatus::Confirmed);

        req.responses
            .push(response("idp2", ResponseStatus::Accept, Some(true)));
        assert_eq!(compute_status(&req), RequestStatus::Completed);
    }

    #[test]
    fn test_invalid_accept_does_not_confirm() {
        let mut req = request(RequestMode::Two, 1);
        req.responses
            .push(response("idp1", ResponseStatus::Accept, Some(false)));
        assert_eq!(compute_status(&req), RequestStatus::Pending);
        assert_eq!(snapshot(&req, Audience::Requester).answered_idp_count, 1);
    }

    #[test]
    fn test_pending_data_holds_completion() {
        let mut req = request(RequestMode::Two, 1);
        req.service_data.push(ServiceDataEntry {
            service_id: "bank_statement".to_string(),
            min_as: 1,
            as_id_list: vec!["as1".to_string()],
            signed_as_ids: vec![],
            received_as_ids: vec![],
        });
        req.responses
            .push(response("idp1", ResponseStatus::Accept, Some(true)));
        assert!(idp_threshold_met(&req));
        assert_eq!(compute_status(&req), RequestStatus::Confirmed);

        req.service_data[0].signed_as_ids.push("as1".to_string());
        req.service_data[0].received_as_ids.push("as1".to_string());
        assert_eq!(compute_status(&req), RequestStatus::Completed);
    }

    #[test]
    fn test_idp_view_hides_validity() {
        let mut req = request(RequestMode::Two, 1);
        req.responses
            .push(response("idp1", ResponseStatus::Accept, Some(true)));

        let idp_view = snapshot(&req, Audience::Idp);
        assert_eq!(idp_view.response_valid_list[0].valid_signature, None);

        let rp_view = snapshot(&req, Audience::Requester);
        assert_eq!(rp_view.response_valid_list[0].valid_signature, Some(true));
        assert_ne!(idp_view, rp_view);
    }

    #[test]
    fn test_mode_one_validity_is_null_for_everyone() {
        let mut req = request(RequestMode::One, 1);
        req.responses
            .push(response("idp1", ResponseStatus::Accept, None));
        let view = snapshot(&req, Audience::Requester);
        assert_eq!(view.response_valid_list[0].valid_ial, None);
        assert_eq!(compute_status(&req), RequestStatus::Completed);
    }

    #[test]
    fn test_consent_exhausted_after_rejections() {
        let mut req = request(RequestMode::Two, 1);
        req.responses
            .push(response("idp1", ResponseStatus::Reject, Some(true)));
        assert!(!consent_exhausted(&req));
        req.responses
            .push(response("idp2", ResponseStatus::Reject, Some(true)));
        assert!(consent_exhausted(&req));
    }
}
