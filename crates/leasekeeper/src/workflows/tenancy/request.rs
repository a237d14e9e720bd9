use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::contract::GeneratedContract;
use super::domain::{Amount, ListingDescriptor, PartyId, RequestId, RequestStatus};

/// One party's signature on the generated agreement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureSlot {
    pub signed: bool,
    pub signed_at: Option<DateTime<Utc>>,
    pub signature_token: Option<String>,
}

impl SignatureSlot {
    fn sign(&mut self, token: String, at: DateTime<Utc>) {
        self.signed = true;
        self.signed_at = Some(at);
        self.signature_token = Some(token);
    }
}

/// Generated agreement attached to a request once the owner accepts it.
///
/// `terms` is written once on approval; only the signature slots change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContract {
    pub terms: GeneratedContract,
    pub tenant_signature: SignatureSlot,
    pub owner_signature: SignatureSlot,
}

impl RequestContract {
    fn unsigned(terms: GeneratedContract) -> Self {
        Self {
            terms,
            tenant_signature: SignatureSlot::default(),
            owner_signature: SignatureSlot::default(),
        }
    }

    pub fn fully_signed(&self) -> bool {
        self.tenant_signature.signed && self.owner_signature.signed
    }
}

/// Bid payload accepted from a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSubmission {
    pub tenant_id: PartyId,
    pub owner_id: PartyId,
    pub listing: ListingDescriptor,
    pub move_in: NaiveDate,
    pub bid_amount: Amount,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub lease_months: Option<u32>,
}

/// One bid by one tenant on one listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenancyRequest {
    pub id: RequestId,
    pub tenant_id: PartyId,
    pub owner_id: PartyId,
    pub listing: ListingDescriptor,
    pub move_in: NaiveDate,
    pub bid_amount: Amount,
    pub message: Option<String>,
    pub lease_months: Option<u32>,
    pub status: RequestStatus,
    pub contract: Option<RequestContract>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Actions a caller can attempt against a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestAction {
    Accept,
    Reject,
    SignAsTenant,
    SignAsOwner,
    Delete,
}

impl fmt::Display for RequestAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RequestAction::Accept => "accept",
            RequestAction::Reject => "reject",
            RequestAction::SignAsTenant => "sign as tenant",
            RequestAction::SignAsOwner => "sign as owner",
            RequestAction::Delete => "delete",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {action} request {request_id} while it is {status}")]
pub struct InvalidTransition {
    pub request_id: RequestId,
    pub status: RequestStatus,
    pub action: RequestAction,
}

impl TenancyRequest {
    pub fn new(id: RequestId, submission: RequestSubmission, at: DateTime<Utc>) -> Self {
        let RequestSubmission {
            tenant_id,
            owner_id,
            listing,
            move_in,
            bid_amount,
            message,
            lease_months,
        } = submission;

        Self {
            id,
            tenant_id,
            owner_id,
            listing,
            move_in,
            bid_amount,
            message: message.filter(|text| !text.trim().is_empty()),
            lease_months,
            status: RequestStatus::Pending,
            contract: None,
            rejection_reason: None,
            created_at: at,
            updated_at: at,
        }
    }

    fn expect_status(
        &self,
        expected: RequestStatus,
        action: RequestAction,
    ) -> Result<(), InvalidTransition> {
        if self.status == expected {
            Ok(())
        } else {
            Err(InvalidTransition {
                request_id: self.id.clone(),
                status: self.status,
                action,
            })
        }
    }

    /// `pending -> approved`, attaching the freshly generated agreement with empty signatures.
    pub fn approve(
        &mut self,
        terms: GeneratedContract,
        at: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        self.expect_status(RequestStatus::Pending, RequestAction::Accept)?;
        self.contract = Some(RequestContract::unsigned(terms));
        self.status = RequestStatus::Approved;
        self.updated_at = at;
        Ok(())
    }

    /// `pending -> rejected`. The reason is validated by the caller.
    pub fn reject(&mut self, reason: String, at: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.expect_status(RequestStatus::Pending, RequestAction::Reject)?;
        self.rejection_reason = Some(reason);
        self.status = RequestStatus::Rejected;
        self.updated_at = at;
        Ok(())
    }

    /// `approved -> awaiting_countersignature`.
    pub fn sign_as_tenant(
        &mut self,
        token: String,
        at: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        self.expect_status(RequestStatus::Approved, RequestAction::SignAsTenant)?;
        let contract = self.contract_mut(RequestAction::SignAsTenant)?;
        contract.tenant_signature.sign(token, at);
        self.status = RequestStatus::AwaitingCountersignature;
        self.updated_at = at;
        Ok(())
    }

    /// `awaiting_countersignature -> completed`.
    pub fn countersign(&mut self, token: String, at: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.expect_status(
            RequestStatus::AwaitingCountersignature,
            RequestAction::SignAsOwner,
        )?;
        let tenant_signed = self
            .contract
            .as_ref()
            .is_some_and(|contract| contract.tenant_signature.signed);
        if !tenant_signed {
            return Err(InvalidTransition {
                request_id: self.id.clone(),
                status: self.status,
                action: RequestAction::SignAsOwner,
            });
        }
        let contract = self.contract_mut(RequestAction::SignAsOwner)?;
        contract.owner_signature.sign(token, at);
        self.status = RequestStatus::Completed;
        self.updated_at = at;
        Ok(())
    }

    pub fn ensure_deletable(&self) -> Result<(), InvalidTransition> {
        self.expect_status(RequestStatus::Pending, RequestAction::Delete)
    }

    fn contract_mut(
        &mut self,
        action: RequestAction,
    ) -> Result<&mut RequestContract, InvalidTransition> {
        let status = self.status;
        let request_id = self.id.clone();
        self.contract.as_mut().ok_or(InvalidTransition {
            request_id,
            status,
            action,
        })
    }

    /// Sanitized view for API responses; omits the full agreement text.
    pub fn status_view(&self) -> RequestStatusView {
        RequestStatusView {
            request_id: self.id.clone(),
            listing_id: self.listing.listing_id.to_string(),
            status: self.status.label(),
            bid_amount: self.bid_amount,
            rent_due_day: self.contract.as_ref().map(|c| c.terms.rent_due_day),
            security_deposit: self.contract.as_ref().map(|c| c.terms.security_deposit),
            lease_end: self.contract.as_ref().map(|c| c.terms.lease_end),
            tenant_signed: self
                .contract
                .as_ref()
                .is_some_and(|c| c.tenant_signature.signed),
            owner_signed: self
                .contract
                .as_ref()
                .is_some_and(|c| c.owner_signature.signed),
            rejection_reason: self.rejection_reason.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestStatusView {
    pub request_id: RequestId,
    pub listing_id: String,
    pub status: &'static str,
    pub bid_amount: Amount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rent_due_day: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_deposit: Option<Amount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_end: Option<NaiveDate>,
    pub tenant_signed: bool,
    pub owner_signed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}
