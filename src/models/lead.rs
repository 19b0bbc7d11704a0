//! Sales-lead models and pipeline stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::state::StateError;

/// Fixed pipeline stages, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadStage {
    New,
    Contacted,
    Qualified,
    Proposal,
    Negotiation,
    Won,
    Lost,
}

impl LeadStage {
    pub const ALL: [LeadStage; 7] = [
        LeadStage::New,
        LeadStage::Contacted,
        LeadStage::Qualified,
        LeadStage::Proposal,
        LeadStage::Negotiation,
        LeadStage::Won,
        LeadStage::Lost,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStage::New => "new",
            LeadStage::Contacted => "contacted",
            LeadStage::Qualified => "qualified",
            LeadStage::Proposal => "proposal",
            LeadStage::Negotiation => "negotiation",
            LeadStage::Won => "won",
            LeadStage::Lost => "lost",
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, LeadStage::Won | LeadStage::Lost)
    }

    /// Open leads move freely between stages; a closed lead may only be
    /// reopened to `new`.
    pub fn move_to(self, target: LeadStage) -> Result<LeadStage, StateError> {
        if self.is_closed() && target != LeadStage::New {
            return Err(StateError::InvalidTransition {
                from: self.to_string(),
                event: format!("move to {target}"),
            });
        }
        Ok(target)
    }
}

impl fmt::Display for LeadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for LeadStage {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        LeadStage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == value)
            .ok_or_else(|| format!("unknown lead stage: {value}"))
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Lead {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    #[sqlx(try_from = "String")]
    pub stage: LeadStage,
    /// Expected deal value in cents
    pub value_cents: i64,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create/update body. The stage is only set on create; afterwards it
/// changes through `POST /api/v1/leads/{id}/stage`.
#[derive(Debug, Deserialize)]
pub struct LeadRequest {
    pub name: String,
    pub email: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub stage: Option<LeadStage>,
    #[serde(default)]
    pub value_cents: i64,
    pub notes: Option<String>,
}

impl LeadRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::InvalidRequest("Lead name is required".to_string()));
        }
        if self.value_cents < 0 {
            return Err(AppError::InvalidRequest(
                "Lead value cannot be negative".to_string(),
            ));
        }
        if let Some(email) = self.email.as_deref().filter(|e| !e.trim().is_empty()) {
            email.trim().parse::<lettre::Address>().map_err(|_| {
                AppError::InvalidRequest(format!("Invalid lead email: {email}"))
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct StageChangeRequest {
    pub stage: LeadStage,
}

#[derive(Debug, Deserialize)]
pub struct LeadListQuery {
    pub stage: Option<LeadStage>,
}

/// One row of `GET /api/v1/leads/pipeline`.
#[derive(Debug, Serialize, PartialEq)]
pub struct PipelineStage {
    pub stage: LeadStage,
    pub count: i64,
    pub value_cents: i64,
}

/// Fill in empty stages so the pipeline always lists every stage in order.
pub fn build_pipeline(rows: Vec<(String, i64, i64)>) -> Vec<PipelineStage> {
    LeadStage::ALL
        .into_iter()
        .map(|stage| {
            let (count, value_cents) = rows
                .iter()
                .find(|(name, _, _)| name == stage.as_str())
                .map(|(_, count, value)| (*count, *value))
                .unwrap_or((0, 0));
            PipelineStage {
                stage,
                count,
                value_cents,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_leads_move_anywhere() {
        assert_eq!(
            LeadStage::New.move_to(LeadStage::Negotiation),
            Ok(LeadStage::Negotiation)
        );
        assert_eq!(LeadStage::Proposal.move_to(LeadStage::Lost), Ok(LeadStage::Lost));
        assert_eq!(
            LeadStage::Qualified.move_to(LeadStage::Contacted),
            Ok(LeadStage::Contacted)
        );
    }

    #[test]
    fn test_closed_leads_only_reopen_to_new() {
        assert_eq!(LeadStage::Won.move_to(LeadStage::New), Ok(LeadStage::New));
        assert!(LeadStage::Won.move_to(LeadStage::Lost).is_err());
        assert!(LeadStage::Lost.move_to(LeadStage::Proposal).is_err());
    }

    #[test]
    fn test_stage_parsing() {
        assert_eq!(
            LeadStage::try_from("negotiation".to_string()),
            Ok(LeadStage::Negotiation)
        );
        assert!(LeadStage::try_from("archived".to_string()).is_err());
    }

    #[test]
    fn test_pipeline_lists_every_stage_in_order() {
        let pipeline = build_pipeline(vec![
            ("won".to_string(), 2, 50_000),
            ("new".to_string(), 5, 0),
        ]);
        assert_eq!(pipeline.len(), LeadStage::ALL.len());
        assert_eq!(pipeline[0].stage, LeadStage::New);
        assert_eq!(pipeline[0].count, 5);
        assert_eq!(pipeline[1].count, 0);
        let won = pipeline.iter().find(|p| p.stage == LeadStage::Won).unwrap();
        assert_eq!(won.value_cents, 50_000);
    }

    #[test]
    fn test_lead_validation() {
        let mut req = LeadRequest {
            name: "Acme".into(),
            email: Some("buyer@acme.test".into()),
            company: None,
            phone: None,
            stage: None,
            value_cents: 0,
            notes: None,
        };
        assert!(req.validate().is_ok());
        req.email = Some("nope".into());
        assert!(req.validate().is_err());
        req.email = Some("".into());
        assert!(req.validate().is_ok());
        req.value_cents = -1;
        assert!(req.validate().is_err());
    }
}
