use std::{
    fs,
    path::{Path, PathBuf},
    process,
};

use base64::{engine::general_purpose, Engine as _};
use clap::{Args, Parser, Subcommand};
use ed25519_dalek::SigningKey;
use rand::{rngs::OsRng, RngCore};

use referral_engine::{
    config::{EngineConfig, State, StateError},
    settings::Bps,
    AccessGate, Account, Amount, Capability, EngineError, PartnerPools, ProjectSettings,
};

//==================== CLI surface ====================//

#[derive(Parser)]
#[command(name = "referral-engine", version, about = "Referral graph and commission engine")]
struct Cli {
    /// State file written by `init` and updated by every mutating command.
    #[arg(long, global = true, default_value = "referral-state.json")]
    state: PathBuf,

    #[command(subcommand)]
    command: Command,
}

/// Who is calling. Accounts given elsewhere accept 64 hex chars or `@label`.
#[derive(Args)]
struct Caller {
    /// 32-byte ed25519 secret key in hex; the caller is its verifying key.
    #[arg(long, conflicts_with = "label")]
    sk_hex: Option<String>,
    /// Local testing identity derived from a label.
    #[arg(long = "as")]
    label: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Generate an operator keypair.
    Keygen {
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Build a fresh state file from a genesis configuration.
    Init {
        #[arg(long)]
        config: PathBuf,
    },
    AddOwner {
        #[command(flatten)]
        caller: Caller,
        #[arg(required = true)]
        accounts: Vec<String>,
    },
    RemoveOwner {
        #[command(flatten)]
        caller: Caller,
        #[arg(required = true)]
        accounts: Vec<String>,
    },
    SetPolicy {
        #[command(flatten)]
        caller: Caller,
        #[arg(long, action = clap::ArgAction::Set)]
        require_owner: bool,
    },
    SetProject {
        #[command(flatten)]
        caller: Caller,
        #[arg(long)]
        application: String,
        #[arg(long, default_value_t = 0)]
        sub_index: u32,
        #[arg(long, default_value_t = 0)]
        partner_fee: Bps,
        /// Comma separated basis points, level 0 first.
        #[arg(long, value_delimiter = ',')]
        levels: Vec<Bps>,
        #[arg(long, default_value_t = 0)]
        discount: Bps,
        #[arg(long)]
        constant: bool,
    },
    RemoveProject {
        #[command(flatten)]
        caller: Caller,
        #[arg(long)]
        application: String,
        #[arg(long, default_value_t = 0)]
        sub_index: u32,
    },
    RegisterPools {
        #[command(flatten)]
        caller: Caller,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        developer: String,
        #[arg(long)]
        partner: String,
    },
    RemovePools {
        #[command(flatten)]
        caller: Caller,
        #[arg(required = true)]
        owners: Vec<String>,
    },
    /// Link a referee under a referrer (trusted applications only).
    Refer {
        #[command(flatten)]
        caller: Caller,
        #[arg(long)]
        referrer: String,
        #[arg(long)]
        referee: String,
    },
    /// Settle a monetized operation and print the discount owed.
    Process {
        #[command(flatten)]
        caller: Caller,
        #[arg(long)]
        payer: String,
        #[arg(long)]
        fee: Amount,
        #[arg(long, default_value_t = 0)]
        sub_index: u32,
        #[arg(long)]
        value: Amount,
    },
    Distribute {
        #[command(flatten)]
        caller: Caller,
        #[arg(long)]
        payer: String,
        #[arg(long, default_value_t = 0)]
        sub_index: u32,
        #[arg(long)]
        value: Amount,
    },
    /// Show the payouts a distribution would make, without moving value.
    Preview {
        #[arg(long)]
        application: String,
        #[arg(long)]
        payer: String,
        #[arg(long, default_value_t = 0)]
        sub_index: u32,
        #[arg(long)]
        value: Amount,
    },
    Link {
        #[command(flatten)]
        caller: Caller,
        #[arg(long)]
        payer: String,
        #[arg(long)]
        external_id: u64,
    },
    /// Credit an account (administrators only).
    Deposit {
        #[command(flatten)]
        caller: Caller,
        #[arg(long)]
        account: String,
        #[arg(long)]
        amount: Amount,
    },
    Tree {
        root: String,
    },
    Info {
        account: String,
    },
    Balances,
    Events,
    Snapshot,
}

//==================== helpers ====================//

fn fail(err: impl std::fmt::Display) -> ! {
    eprintln!("error: {err}");
    process::exit(2)
}

fn account_arg(value: &str) -> Account {
    if let Some(label) = value.strip_prefix('@') {
        return Account::derive(label);
    }
    value
        .parse()
        .unwrap_or_else(|err| fail(format!("invalid account {value:?}: {err}")))
}

fn accounts_arg(values: &[String]) -> Vec<Account> {
    values.iter().map(|v| account_arg(v)).collect()
}

impl Caller {
    fn resolve(&self) -> Account {
        if let Some(sk_hex) = &self.sk_hex {
            let bytes = hex::decode(sk_hex.trim())
                .unwrap_or_else(|err| fail(format!("invalid --sk-hex: {err}")));
            let secret: [u8; 32] = bytes
                .as_slice()
                .try_into()
                .unwrap_or_else(|_| fail("--sk-hex must be 32 bytes (64 hex)"));
            return Account::from(SigningKey::from_bytes(&secret).verifying_key());
        }
        match &self.label {
            Some(label) => Account::derive(label),
            None => fail("missing caller: pass --sk-hex=<HEX> or --as=<label>"),
        }
    }
}

fn load(path: &Path) -> State {
    State::load(path).unwrap_or_else(|err| fail(err))
}

fn save(state: &State, path: &Path) {
    state.save(path).unwrap_or_else(|err| fail(err));
}

/// Loads the state, applies `f`, and writes the state back only on success.
fn mutate<T>(path: &Path, f: impl FnOnce(&mut State) -> Result<T, EngineError>) -> T {
    let mut state = load(path);
    let out = f(&mut state).unwrap_or_else(|err| fail(err));
    save(&state, path);
    out
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(err) => fail(StateError::from(err)),
    }
}

//==================== commands ====================//

fn keygen_cmd(out_dir: &Path) {
    fs::create_dir_all(out_dir).unwrap_or_else(|err| fail(err));

    let mut sk_bytes = [0u8; 32];
    OsRng.fill_bytes(&mut sk_bytes);
    let sk = SigningKey::from_bytes(&sk_bytes);
    let account = Account::from(sk.verifying_key());

    let write = |name: &str, contents: String| {
        fs::write(out_dir.join(name), contents).unwrap_or_else(|err| fail(err));
    };
    write("sk.hex", hex::encode(sk_bytes));
    write("sk.b64", general_purpose::STANDARD.encode(sk_bytes));
    write("account.hex", account.to_string());
    println!("keypair written → {} (account {account})", out_dir.display());
}

fn init_cmd(config: &Path, state_path: &Path) {
    let config = EngineConfig::load(config).unwrap_or_else(|err| fail(err));
    let state = config.build().unwrap_or_else(|err| fail(err));
    save(&state, state_path);
    println!("state initialised → {}", state_path.display());
}

fn tree_cmd(state: &State, root: Account) {
    for (account, level) in state.engine.graph().referral_tree(root) {
        println!("{}{account}", "  ".repeat(level as usize));
    }
}

fn info_cmd(state: &State, account: Account) {
    let graph = state.engine.graph();
    println!("account          {account}");
    println!("community owner  {}", graph.is_community_owner(&account));
    println!("referrer         {}", graph.referrer(&account));
    println!("credited owner   {}", graph.community_owner(&account));
    println!("level            {}", graph.referral_level(&account));
    println!("referees         {}", graph.referee_count(&account));
    println!("minted links     {}", state.engine.links().minted_count(&account));
    println!("balance          {}", state.ledger.balance(&account));
    if let Some(pools) = state.engine.partner_pools(&account) {
        println!("developer pool   {}", pools.developer);
        println!("partner pool     {}", pools.partner);
    }
}

//==================== main ====================//

fn main() {
    let cli = Cli::parse();
    let path = cli.state.as_path();

    match cli.command {
        Command::Keygen { out_dir } => keygen_cmd(&out_dir),
        Command::Init { config } => init_cmd(&config, path),
        Command::AddOwner { caller, accounts } => {
            let (caller, accounts) = (caller.resolve(), accounts_arg(&accounts));
            mutate(path, |s| s.engine.register_community_owners(caller, &accounts));
            println!("{} community owner(s) registered", accounts.len());
        }
        Command::RemoveOwner { caller, accounts } => {
            let (caller, accounts) = (caller.resolve(), accounts_arg(&accounts));
            mutate(path, |s| s.engine.remove_community_owners(caller, &accounts));
            println!("{} community owner(s) removed", accounts.len());
        }
        Command::SetPolicy {
            caller,
            require_owner,
        } => {
            let caller = caller.resolve();
            mutate(path, |s| s.engine.set_require_community_owner(caller, require_owner));
            println!("require community owner: {require_owner}");
        }
        Command::SetProject {
            caller,
            application,
            sub_index,
            partner_fee,
            levels,
            discount,
            constant,
        } => {
            let (caller, application) = (caller.resolve(), account_arg(&application));
            let settings = ProjectSettings {
                partner_fee_bps: partner_fee,
                level_fees_bps: levels,
                discount_bps: discount,
                constant_discount: constant,
            };
            mutate(path, |s| s.engine.set_project(caller, application, sub_index, settings));
            println!("project {}/{sub_index} configured", application.short());
        }
        Command::RemoveProject {
            caller,
            application,
            sub_index,
        } => {
            let (caller, application) = (caller.resolve(), account_arg(&application));
            let removed = mutate(path, |s| s.engine.remove_project(caller, application, sub_index));
            match removed {
                Some(_) => println!("project {}/{sub_index} removed", application.short()),
                None => println!("project {}/{sub_index} was not configured", application.short()),
            }
        }
        Command::RegisterPools {
            caller,
            owner,
            developer,
            partner,
        } => {
            let caller = caller.resolve();
            let owner = account_arg(&owner);
            let pools = PartnerPools {
                developer: account_arg(&developer),
                partner: account_arg(&partner),
            };
            mutate(path, |s| s.engine.register_partner_pools(caller, &[(owner, pools)]));
            println!("partner pools registered for {}", owner.short());
        }
        Command::RemovePools { caller, owners } => {
            let (caller, owners) = (caller.resolve(), accounts_arg(&owners));
            mutate(path, |s| s.engine.remove_partner_pools(caller, &owners));
            println!("{} pool registration(s) removed", owners.len());
        }
        Command::Refer {
            caller,
            referrer,
            referee,
        } => {
            let caller = caller.resolve();
            let (referrer, referee) = (account_arg(&referrer), account_arg(&referee));
            let link = mutate(path, |s| s.engine.add_referral(caller, referrer, referee));
            println!(
                "{} → {} (level {}, owner {})",
                link.referrer.short(),
                link.referee.short(),
                link.level,
                link.community_owner.short()
            );
        }
        Command::Process {
            caller,
            payer,
            fee,
            sub_index,
            value,
        } => {
            let (caller, payer) = (caller.resolve(), account_arg(&payer));
            let discount = mutate(path, |s| {
                s.engine
                    .process_operation(caller, payer, fee, sub_index, value, &mut s.ledger)
            });
            println!("processed {value}, discount {discount}");
        }
        Command::Distribute {
            caller,
            payer,
            sub_index,
            value,
        } => {
            let (caller, payer) = (caller.resolve(), account_arg(&payer));
            let plan = mutate(path, |s| {
                s.engine
                    .distribute_funds(caller, payer, sub_index, value, &mut s.ledger)
            });
            for payout in &plan.payouts {
                println!("{:>14} → {} ({})", payout.amount, payout.to, payout.kind.memo());
            }
        }
        Command::Preview {
            application,
            payer,
            sub_index,
            value,
        } => {
            let state = load(path);
            let plan = state.engine.preview_distribution(
                account_arg(&application),
                account_arg(&payer),
                sub_index,
                value,
            );
            print_json(&plan);
        }
        Command::Link {
            caller,
            payer,
            external_id,
        } => {
            let (caller, payer) = (caller.resolve(), account_arg(&payer));
            match mutate(path, |s| s.engine.store_partner_link(caller, payer, external_id)) {
                Some(partner) => println!("item {external_id} → partner {partner}"),
                None => println!("payer has no community owner, nothing stored"),
            }
        }
        Command::Deposit {
            caller,
            account,
            amount,
        } => {
            let (caller, account) = (caller.resolve(), account_arg(&account));
            mutate(path, |s| {
                if !s.engine.gate().allows(&caller, Capability::Administrator) {
                    return Err(EngineError::Unauthorized {
                        caller,
                        capability: Capability::Administrator,
                    });
                }
                s.ledger.deposit(account, amount);
                Ok(())
            });
            println!("deposited {amount} → {}", account.short());
        }
        Command::Tree { root } => tree_cmd(&load(path), account_arg(&root)),
        Command::Info { account } => info_cmd(&load(path), account_arg(&account)),
        Command::Balances => {
            let state = load(path);
            for (account, amount) in state.ledger.balances() {
                println!("{account} {amount:>14}");
            }
            println!("escrow {:>14}", state.ledger.escrow());
        }
        Command::Events => {
            let state = load(path);
            print_json(&state.engine.events());
            print_json(&state.ledger.events());
        }
        Command::Snapshot => print_json(&load(path).ledger.snapshot()),
    }
}
