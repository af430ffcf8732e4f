use crate::types::{BurnEvent, CorrelatedTransfer, MintEvent, TransferStatus};

/// Combine a burn with the mint found for it, if any.
///
/// The pair is `Matched` only when both nonces are known and equal and the
/// mint names the burn's source domain. A mint whose source domain could not
/// be read (a Solana receive with only an offset-read nonce) stays attached
/// but `Unmatched`, since nonces are only unique per source domain.
pub fn assemble(burn: BurnEvent, mint: Option<MintEvent>) -> CorrelatedTransfer {
    let status = match &mint {
        Some(mint) if is_consistent(&burn, mint) => TransferStatus::Matched,
        _ => TransferStatus::Unmatched,
    };
    CorrelatedTransfer { burn, mint, status }
}

fn is_consistent(burn: &BurnEvent, mint: &MintEvent) -> bool {
    burn.nonce.matches(&mint.nonce)
        && mint.source_domain == Some(burn.source_domain)
}
