//! Instruction filter: program id + exact operation tag.

use solana_sdk::pubkey::Pubkey;

use crate::ledger::LedgerTransaction;

/// Account index of the appended-to account.
pub const TARGET_ACCOUNT_INDEX: usize = 0;
/// Account index of the signer of an append.
pub const SENDER_ACCOUNT_INDEX: usize = 1;

/// An instruction addressed to the program with the requested tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatchedInstruction<'a> {
    /// Full instruction data, tag included.
    pub payload : &'a [u8],
    pub target  : Pubkey,
    pub sender  : Pubkey,
    /// Position in the transaction's instruction list.
    pub position: usize,
}

/// Instructions of `tx` calling `program_id` whose data starts with `tag`.
///
/// Account positions are fixed by the program: 0 is the target account,
/// 1 the signer. Instructions with fewer than two accounts are skipped.
pub fn matching_instructions<'a>(
    tx: &'a LedgerTransaction,
    program_id: &'a Pubkey,
    tag: &'a [u8],
) -> impl Iterator<Item = MatchedInstruction<'a>> + 'a {
    tx.instructions
        .iter()
        .enumerate()
        .filter(move |(_, ix)| ix.program_id == *program_id)
        .filter(move |(_, ix)| ix.data.len() >= tag.len() && ix.data[..tag.len()] == *tag)
        .filter_map(|(position, ix)| {
            Some(MatchedInstruction {
                payload: &ix.data,
                target : *ix.accounts.get(TARGET_ACCOUNT_INDEX)?,
                sender : *ix.accounts.get(SENDER_ACCOUNT_INDEX)?,
                position,
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerInstruction;
    use crate::protocol::Operation;
    use solana_sdk::signature::Signature;

    fn ix(program_id: Pubkey, accounts: Vec<Pubkey>, data: Vec<u8>) -> LedgerInstruction {
        LedgerInstruction { program_id, accounts, data }
    }

    fn tx(instructions: Vec<LedgerInstruction>) -> LedgerTransaction {
        LedgerTransaction {
            signature: Signature::default(),
            slot: 1,
            block_time: None,
            failed: false,
            instructions,
        }
    }

    #[test]
    fn keeps_only_program_and_tag_matches() {
        let program = Pubkey::new_unique();
        let other = Pubkey::new_unique();
        let thread = Pubkey::new_unique();
        let sender = Pubkey::new_unique();
        let tag = Operation::SendMessage.tag();
        let mut good = tag.to_vec();
        good.extend_from_slice(&[1, 0, 0, 0]);

        let t = tx(vec![
            ix(other, vec![thread, sender], good.clone()),
            ix(program, vec![thread, sender], Operation::SendBroadcast.tag().to_vec()),
            ix(program, vec![thread, sender], tag[..7].to_vec()),
            ix(program, vec![thread, sender], good.clone()),
        ]);

        let found: Vec<_> = matching_instructions(&t, &program, &tag).collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].position, 3);
        assert_eq!(found[0].payload, &good[..]);
        assert_eq!(found[0].target, thread);
        assert_eq!(found[0].sender, sender);
    }

    #[test]
    fn sender_is_always_second_account() {
        let program = Pubkey::new_unique();
        let tag = Operation::SendMessage.tag();
        let (a, b, c) = (Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique());
        let t = tx(vec![ix(program, vec![a, b, c], tag.to_vec())]);
        let m = matching_instructions(&t, &program, &tag).next().unwrap();
        assert_eq!(m.sender, b);
    }

    #[test]
    fn skips_instruction_without_signer_slot() {
        let program = Pubkey::new_unique();
        let tag = Operation::SendMessage.tag();
        let t = tx(vec![ix(program, vec![Pubkey::new_unique()], tag.to_vec())]);
        assert_eq!(matching_instructions(&t, &program, &tag).count(), 0);
    }

    #[test]
    fn preserves_instruction_order() {
        let program = Pubkey::new_unique();
        let tag = Operation::SendBroadcast.tag();
        let accounts = vec![Pubkey::new_unique(), Pubkey::new_unique()];
        let t = tx(vec![
            ix(program, accounts.clone(), tag.to_vec()),
            ix(Pubkey::new_unique(), accounts.clone(), tag.to_vec()),
            ix(program, accounts, tag.to_vec()),
        ]);
        let positions: Vec<_> = matching_instructions(&t, &program, &tag).map(|m| m.position).collect();
        assert_eq!(positions, vec![0, 2]);
    }
}
