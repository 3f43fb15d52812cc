//! Workflow operations exposed on the command line. Each prints one JSON
//! outcome; successful calls embed the affected workflow or list under `data`.

use std::str::FromStr;

use clap::Args;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use signoff_core::domain::authority::{AppKind, RequestType};
use signoff_core::domain::org::EmployeeId;
use signoff_core::domain::workflow::{
    ApprovalLog, RequestKind, RequestRef, Urgency, WorkflowId, WorkflowSnapshot,
};
use signoff_core::ledger::VerificationResult;
use signoff_db::{OperationContext, SubmitRequest};

use crate::commands::{invalid_input, service_failure, with_service, CommandFailure, CommandResult};

#[derive(Debug, Args)]
pub struct SubmitArgs {
    #[arg(long, help = "Record kind, e.g. petty_cash or leave_request")]
    pub kind: String,
    #[arg(long, help = "Identifier of the record within its kind")]
    pub id: String,
    #[arg(long, help = "Owning application, e.g. humanresource")]
    pub app: String,
    #[arg(long = "request-type", help = "Request type used to look up authorities")]
    pub request_type: String,
    #[arg(long, help = "Employee id of the requestor")]
    pub requestor: String,
    #[arg(long)]
    pub title: String,
    #[arg(long, help = "Monetary amount, used for amount-bounded authorities")]
    pub amount: Option<String>,
    #[arg(long, default_value = "medium")]
    pub urgency: String,
    #[arg(long, default_value = "")]
    pub notes: String,
}

#[derive(Debug, Args)]
pub struct DecisionArgs {
    #[arg(long)]
    pub workflow: String,
    #[arg(long, help = "Approval level being decided")]
    pub level: u8,
    #[arg(long, help = "Employee id of the approver")]
    pub employee: String,
    #[arg(long, default_value = "")]
    pub comments: String,
}

#[derive(Debug, Args)]
pub struct CancelArgs {
    #[arg(long)]
    pub workflow: String,
    #[arg(long, help = "Employee id of the requestor")]
    pub requestor: String,
    #[arg(long, default_value = "")]
    pub reason: String,
}

#[derive(Debug, Args)]
pub struct CommentArgs {
    #[arg(long)]
    pub workflow: String,
    #[arg(long)]
    pub employee: String,
    #[arg(long)]
    pub text: String,
}

#[derive(Debug, Args)]
pub struct RecordArgs {
    #[arg(long)]
    pub kind: String,
    #[arg(long)]
    pub id: String,
}

#[derive(Debug, Serialize)]
struct History {
    workflow: Option<WorkflowSnapshot>,
    log: Vec<ApprovalLog>,
    verification: Option<VerificationResult>,
}

pub fn submit(args: SubmitArgs) -> CommandResult {
    let request = match submit_request(args) {
        Ok(request) => request,
        Err(failure) => return CommandResult::from_failure("submit", failure),
    };

    let ctx = operation_context();
    let result = with_service(|service| async move {
        service
            .submit(&ctx, request)
            .await
            .map_err(|error| service_failure(error, &ctx.correlation_id))
    });
    snapshot_outcome("submit", result)
}

pub fn approve(args: DecisionArgs) -> CommandResult {
    let DecisionArgs { workflow, level, employee, comments } = args;
    let ctx = operation_context();
    let result = with_service(|service| async move {
        service
            .approve(&ctx, &WorkflowId(workflow), level, &EmployeeId(employee), &comments)
            .await
            .map_err(|error| service_failure(error, &ctx.correlation_id))
    });
    snapshot_outcome("approve", result)
}

pub fn reject(args: DecisionArgs) -> CommandResult {
    let DecisionArgs { workflow, level, employee, comments } = args;
    let ctx = operation_context();
    let result = with_service(|service| async move {
        service
            .reject(&ctx, &WorkflowId(workflow), level, &EmployeeId(employee), &comments)
            .await
            .map_err(|error| service_failure(error, &ctx.correlation_id))
    });
    snapshot_outcome("reject", result)
}

pub fn cancel(args: CancelArgs) -> CommandResult {
    let CancelArgs { workflow, requestor, reason } = args;
    let ctx = operation_context();
    let result = with_service(|service| async move {
        service
            .cancel(&ctx, &WorkflowId(workflow), &EmployeeId(requestor), &reason)
            .await
            .map_err(|error| service_failure(error, &ctx.correlation_id))
    });
    snapshot_outcome("cancel", result)
}

pub fn comment(args: CommentArgs) -> CommandResult {
    let CommentArgs { workflow, employee, text } = args;
    let ctx = operation_context();
    let result = with_service(|service| async move {
        service
            .comment(&ctx, &WorkflowId(workflow), &EmployeeId(employee), &text)
            .await
            .map_err(|error| service_failure(error, &ctx.correlation_id))
    });
    snapshot_outcome("comment", result)
}

pub fn pending(employee: String) -> CommandResult {
    let ctx = operation_context();
    let result = with_service(|service| async move {
        service
            .pending_for(&EmployeeId(employee))
            .await
            .map_err(|error| service_failure(error, &ctx.correlation_id))
    });

    match result {
        Ok(pending) => CommandResult::success_with_data(
            "pending",
            format!("{} approval(s) waiting", pending.len()),
            &pending,
        ),
        Err(failure) => CommandResult::from_failure("pending", failure),
    }
}

/// Log of the workflow bound to a record, plus a check of its hash chain.
pub fn history(args: RecordArgs) -> CommandResult {
    let request = match request_ref(&args.kind, args.id) {
        Ok(request) => request,
        Err(failure) => return CommandResult::from_failure("history", failure),
    };

    let ctx = operation_context();
    let result = with_service(|service| async move {
        let failed = |error| service_failure(error, &ctx.correlation_id);
        let workflow = service.workflow_for(&request).await.map_err(failed)?;
        let Some(snapshot) = workflow else {
            return Ok(History { workflow: None, log: Vec::new(), verification: None });
        };
        let log = service.history_for(&request).await.map_err(failed)?;
        let verification = service.verify_history(&snapshot.workflow.id).await.map_err(failed)?;
        Ok(History { workflow: Some(snapshot), log, verification: Some(verification) })
    });

    match result {
        Ok(history) => {
            let message = match &history.verification {
                None => "no workflow for this record".to_string(),
                Some(verification) if verification.valid => {
                    format!("{} log entries, chain verified", history.log.len())
                }
                Some(verification) => format!(
                    "{} log entries, chain broken: {}",
                    history.log.len(),
                    verification.failure_reason.as_deref().unwrap_or("unknown")
                ),
            };
            CommandResult::success_with_data("history", message, &history)
        }
        Err(failure) => CommandResult::from_failure("history", failure),
    }
}

fn snapshot_outcome(
    command: &str,
    result: Result<WorkflowSnapshot, CommandFailure>,
) -> CommandResult {
    match result {
        Ok(snapshot) => CommandResult::success_with_data(
            command,
            format!(
                "workflow {} is {} at level {}/{}",
                snapshot.workflow.id.0,
                snapshot.workflow.status.as_str(),
                snapshot.workflow.current_approval_level,
                snapshot.workflow.total_approval_levels
            ),
            &snapshot,
        ),
        Err(failure) => CommandResult::from_failure(command, failure),
    }
}

fn operation_context() -> OperationContext {
    OperationContext::new(format!("cli-{}", Uuid::new_v4()))
}

fn request_ref(kind: &str, id: String) -> Result<RequestRef, CommandFailure> {
    let kind = RequestKind::parse(kind)
        .ok_or_else(|| invalid_input(format!("unknown record kind `{kind}`")))?;
    if id.trim().is_empty() {
        return Err(invalid_input("record id must not be empty"));
    }
    Ok(RequestRef::new(kind, id))
}

fn submit_request(args: SubmitArgs) -> Result<SubmitRequest, CommandFailure> {
    let request = request_ref(&args.kind, args.id)?;
    let app = AppKind::parse(&args.app)
        .ok_or_else(|| invalid_input(format!("unknown app `{}`", args.app)))?;
    let request_type = RequestType::parse(&args.request_type)
        .ok_or_else(|| invalid_input(format!("unknown request type `{}`", args.request_type)))?;
    let urgency = Urgency::parse(&args.urgency)
        .ok_or_else(|| invalid_input(format!("unknown urgency `{}`", args.urgency)))?;
    let amount = args
        .amount
        .as_deref()
        .map(|raw| {
            Decimal::from_str(raw.trim())
                .map_err(|error| invalid_input(format!("invalid amount `{raw}`: {error}")))
        })
        .transpose()?;

    Ok(SubmitRequest {
        request,
        app,
        request_type,
        requestor_id: EmployeeId(args.requestor),
        title: args.title,
        amount,
        urgency,
        notes: args.notes,
    })
}
