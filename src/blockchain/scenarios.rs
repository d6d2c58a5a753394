// Adversarial walkthroughs against a single ledger: tampering with history,
// forged signatures, and two blocks racing for the same slot.

use std::thread;

use super::block::Block;
use super::chain::{Candidate, Ledger, LedgerError};
use super::crypto::KeyPair;
use super::pow::CancelToken;
use super::transaction::Transaction;
use crate::config::LedgerConfig;

fn ledger() -> Ledger {
    Ledger::new(&LedgerConfig {
        difficulty: 2,
        allow_empty_blocks: false,
        cancel_check_interval: 64,
    })
    .unwrap()
}

fn signed_transfer(sender: &KeyPair, recipient: &KeyPair, amount: f64) -> Transaction {
    let mut transaction =
        Transaction::new(sender.address().clone(), recipient.address().clone(), amount).unwrap();
    transaction.sign(sender).unwrap();
    transaction
}

/// Ledger with `blocks` mined blocks after genesis, one transfer each
fn mined_ledger(blocks: usize) -> Ledger {
    let ledger = ledger();
    let alice = KeyPair::generate().unwrap();
    let bob = KeyPair::generate().unwrap();

    for i in 0..blocks {
        ledger.submit_transaction(signed_transfer(&alice, &bob, 10.0 + i as f64)).unwrap();
        ledger.mine().unwrap();
    }

    assert!(ledger.validate_chain());
    ledger
}

/// Sets a proof to 0, or to 1 when the search already landed on 0
fn zero_proof(block: &mut Block) {
    block.proof = if block.proof == 0 { 1 } else { 0 };
}

/// Flips one hex digit so the string stays well formed
fn flip_hex(value: &mut String) {
    let last = value.pop().unwrap();
    value.push(if last == '0' { '1' } else { '0' });
}

#[test]
fn alice_pays_bob() {
    let ledger = ledger();
    let alice = KeyPair::generate().unwrap();
    let bob = KeyPair::generate().unwrap();
    let transaction = signed_transfer(&alice, &bob, 10.0);

    assert_eq!(ledger.submit_transaction(transaction.clone()).unwrap(), 1);

    let block = ledger.mine().unwrap();
    assert_eq!(block.transactions, vec![transaction]);
    assert!(ledger.pending_transactions().is_empty());
    assert!(ledger.validate_chain());
}

#[test]
fn signature_from_wrong_key_is_rejected() {
    let ledger = ledger();
    let alice = KeyPair::generate().unwrap();
    let bob = KeyPair::generate().unwrap();
    let mallory = KeyPair::generate().unwrap();

    ledger.submit_transaction(signed_transfer(&alice, &bob, 1.0)).unwrap();
    let before = ledger.pending_transactions();

    // Mallory claims to be Alice
    let mut forged = Transaction::new(alice.address().clone(), mallory.address().clone(), 50.0).unwrap();
    forged.sign(&mallory).unwrap();

    assert!(matches!(
        ledger.submit_transaction(forged),
        Err(LedgerError::InvalidSignature)
    ));
    assert_eq!(ledger.pending_transactions(), before);
}

#[test]
fn zeroed_proof_breaks_chain() {
    let ledger = mined_ledger(2);

    ledger.tamper_chain(|chain| zero_proof(&mut chain[1]));

    assert!(!ledger.validate_chain());
}

#[test]
fn any_single_field_mutation_is_detected() {
    let mutations: Vec<(&str, Box<dyn Fn(&mut Vec<Block>)>)> = vec![
        ("current_hash", Box::new(|chain: &mut Vec<Block>| flip_hex(&mut chain[1].current_hash))),
        ("last current_hash", Box::new(|chain: &mut Vec<Block>| flip_hex(&mut chain[2].current_hash))),
        ("previous_hash", Box::new(|chain: &mut Vec<Block>| flip_hex(&mut chain[2].previous_hash))),
        ("proof", Box::new(|chain: &mut Vec<Block>| chain[2].proof += 1)),
        ("genesis proof", Box::new(|chain: &mut Vec<Block>| chain[0].proof += 1)),
        ("amount", Box::new(|chain: &mut Vec<Block>| chain[1].transactions[0].amount = 1_000.0)),
        ("last amount", Box::new(|chain: &mut Vec<Block>| chain[2].transactions[0].amount = 0.0)),
        ("recipient", Box::new(|chain: &mut Vec<Block>| {
            let thief = KeyPair::generate().unwrap();
            chain[1].transactions[0].recipient = thief.address().clone();
        })),
        ("timestamp", Box::new(|chain: &mut Vec<Block>| {
            chain[2].timestamp = chain[2].timestamp + chrono::Duration::seconds(1);
        })),
    ];

    for (name, mutate) in mutations {
        let ledger = mined_ledger(2);
        ledger.tamper_chain(|chain| mutate(chain));
        assert!(!ledger.validate_chain(), "mutating {} went unnoticed", name);
    }
}

#[test]
fn rehashing_a_tampered_block_still_breaks_the_link() {
    let ledger = mined_ledger(3);

    ledger.tamper_chain(|chain| {
        chain[1].transactions[0].amount = 0.01;
        chain[1].current_hash = chain[1].compute_hash().unwrap();
    });

    assert!(!ledger.validate_chain());
}

#[test]
fn invalid_history_does_not_stop_the_ledger() {
    let ledger = mined_ledger(1);
    ledger.tamper_chain(|chain| zero_proof(&mut chain[1]));
    assert!(!ledger.validate_chain());

    let alice = KeyPair::generate().unwrap();
    let bob = KeyPair::generate().unwrap();
    assert!(ledger.submit_transaction(signed_transfer(&alice, &bob, 1.0)).is_ok());
}

#[test]
fn double_spend_race_appends_only_one_block() {
    let ledger = mined_ledger(1);
    let alice = KeyPair::generate().unwrap();
    let bob = KeyPair::generate().unwrap();
    let mallory = KeyPair::generate().unwrap();

    // The same funds promised to two recipients
    let to_bob = signed_transfer(&alice, &bob, 10.0);
    let to_mallory = signed_transfer(&alice, &mallory, 10.0);

    let tip = ledger.last_block().unwrap();
    let racing = |transaction: Transaction| Candidate {
        index: tip.index + 1,
        previous_hash: tip.current_hash.clone(),
        transactions: vec![transaction],
    };

    let token = CancelToken::new();
    let honest = racing(to_bob).mine(ledger.pow(), &token).unwrap();
    let attacker = racing(to_mallory).mine(ledger.pow(), &token).unwrap();

    ledger.append_block(honest.clone()).unwrap();
    assert!(matches!(ledger.append_block(attacker), Err(LedgerError::StaleBlock(_))));

    let chain = ledger.dump_chain();
    assert_eq!(chain.len(), 3);
    assert_eq!(chain[2], honest);
    assert!(ledger.validate_chain());
}

#[test]
fn premined_block_cannot_replace_the_tip() {
    let ledger = mined_ledger(1);
    let alice = KeyPair::generate().unwrap();
    let bob = KeyPair::generate().unwrap();
    let mallory = KeyPair::generate().unwrap();

    // Attacker mines a private successor of genesis paying themselves
    let genesis = ledger.dump_chain()[0].clone();
    let private = Candidate {
        index: genesis.index + 1,
        previous_hash: genesis.current_hash.clone(),
        transactions: vec![signed_transfer(&alice, &mallory, 10.0)],
    }
    .mine(ledger.pow(), &CancelToken::new())
    .unwrap();

    ledger.submit_transaction(signed_transfer(&alice, &bob, 10.0)).unwrap();
    ledger.mine().unwrap();
    let before = ledger.dump_chain();

    assert!(matches!(ledger.append_block(private), Err(LedgerError::StaleBlock(_))));
    assert_eq!(ledger.dump_chain(), before);
}

#[test]
fn replaying_a_confirmed_block_is_refused() {
    let ledger = mined_ledger(1);
    let confirmed = ledger.last_block().unwrap();

    // Same transactions re-mined on top of the current tip
    let replay = Candidate {
        index: confirmed.index + 1,
        previous_hash: confirmed.current_hash.clone(),
        transactions: confirmed.transactions.clone(),
    }
    .mine(ledger.pow(), &CancelToken::new())
    .unwrap();

    assert!(matches!(
        ledger.append_block(replay),
        Err(LedgerError::DuplicateTransaction(_))
    ));
    assert_eq!(ledger.dump_chain().len(), 2);
}

#[test]
fn concurrent_miners_produce_one_block() {
    let ledger = ledger();
    let alice = KeyPair::generate().unwrap();
    let bob = KeyPair::generate().unwrap();
    ledger.submit_transaction(signed_transfer(&alice, &bob, 10.0)).unwrap();

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let ledger = ledger.clone();
            thread::spawn(move || ledger.mine_detached(&CancelToken::new()))
        })
        .collect();

    let results: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    let mined = results.iter().filter(|r| r.is_ok()).count();

    assert_eq!(mined, 1);
    for result in &results {
        assert!(matches!(
            result,
            Ok(_) | Err(LedgerError::StaleBlock(_)) | Err(LedgerError::NoPendingTransactions)
        ));
    }

    let chain = ledger.dump_chain();
    assert_eq!(chain.len(), 2);
    assert!(ledger.validate_chain());
}
