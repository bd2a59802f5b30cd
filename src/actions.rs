//! Caller-facing action parameters and their validation into chain actions.
//!
//! `ActionParams` is the JSON shape applications hand to the SDK (string
//! amounts, NEAR-format keys); `to_action` validates and converts into the
//! borsh-ready [`Action`].

use serde::{Deserialize, Serialize};

use crate::types::near::{
    AccessKey, AccountId, Action, Balance, DelegateAction, FunctionCallAction, Gas, PublicKey,
    Signature, SignedDelegate,
};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "action_type")]
pub enum ActionParams {
    CreateAccount,
    DeployContract {
        code: Vec<u8>,
    },
    FunctionCall {
        method_name: String,
        args: String, // JSON string
        gas: String,
        deposit: String,
    },
    Transfer {
        deposit: String,
    },
    Stake {
        stake: String,
        public_key: String,
    },
    AddKey {
        public_key: String,
        access_key: String, // JSON string
    },
    DeleteKey {
        public_key: String,
    },
    DeleteAccount {
        beneficiary_id: String,
    },
    SignedDelegate {
        delegate_action: DelegateAction,
        signature: Signature,
    },
}

impl ActionParams {
    /// Validate the params and convert into a concrete chain `Action`.
    pub fn to_action(&self) -> Result<Action, String> {
        match self {
            ActionParams::CreateAccount => Ok(Action::CreateAccount),

            ActionParams::DeployContract { code } => {
                if code.is_empty() {
                    return Err("Contract code cannot be empty".to_string());
                }
                Ok(Action::DeployContract { code: code.clone() })
            }

            ActionParams::FunctionCall {
                method_name,
                args,
                gas,
                deposit,
            } => {
                if method_name.is_empty() {
                    return Err("Method name cannot be empty".to_string());
                }
                let gas_amount = gas
                    .parse::<Gas>()
                    .map_err(|_| "Invalid gas amount".to_string())?;
                let deposit_amount = deposit
                    .parse::<Balance>()
                    .map_err(|_| "Invalid deposit amount".to_string())?;

                Ok(Action::FunctionCall(Box::new(FunctionCallAction {
                    method_name: method_name.clone(),
                    args: args.as_bytes().to_vec(),
                    gas: gas_amount,
                    deposit: deposit_amount,
                })))
            }

            ActionParams::Transfer { deposit } => {
                if deposit.is_empty() {
                    return Err("Transfer deposit cannot be empty".to_string());
                }
                let deposit_amount = deposit
                    .parse::<Balance>()
                    .map_err(|_| "Invalid deposit amount".to_string())?;
                Ok(Action::Transfer {
                    deposit: deposit_amount,
                })
            }

            ActionParams::Stake { stake, public_key } => {
                let stake_amount = stake
                    .parse::<Balance>()
                    .map_err(|_| "Invalid stake amount".to_string())?;
                let public_key = PublicKey::from_near_format(public_key)?;
                Ok(Action::Stake {
                    stake: stake_amount,
                    public_key,
                })
            }

            ActionParams::AddKey {
                public_key,
                access_key,
            } => {
                let public_key = PublicKey::from_near_format(public_key)?;
                let access_key: AccessKey = serde_json::from_str(access_key)
                    .map_err(|e| format!("AccessKey deserialization failed: {}", e))?;
                Ok(Action::AddKey {
                    public_key,
                    access_key,
                })
            }

            ActionParams::DeleteKey { public_key } => {
                let public_key = PublicKey::from_near_format(public_key)?;
                Ok(Action::DeleteKey { public_key })
            }

            ActionParams::DeleteAccount { beneficiary_id } => {
                let beneficiary = beneficiary_id
                    .parse::<AccountId>()
                    .map_err(|e| format!("Failed to parse beneficiary account ID: {}", e))?;
                Ok(Action::DeleteAccount {
                    beneficiary_id: beneficiary,
                })
            }

            ActionParams::SignedDelegate {
                delegate_action,
                signature,
            } => {
                if delegate_action.actions.is_empty() {
                    return Err("delegate_action.actions cannot be empty".to_string());
                }
                if delegate_action.nonce == 0 {
                    return Err("delegate_action.nonce must be non-zero".to_string());
                }
                Ok(Action::SignedDelegate(Box::new(SignedDelegate {
                    delegate_action: delegate_action.clone(),
                    signature: signature.clone(),
                })))
            }
        }
    }

    /// Parameter-validity check without keeping the constructed action.
    pub fn validate(&self) -> Result<(), String> {
        self.to_action().map(|_| ())
    }
}

/// Build actions from a list of parameters, reporting the failing index.
pub fn build_actions_from_params(action_params: &[ActionParams]) -> Result<Vec<Action>, String> {
    let mut actions = Vec::with_capacity(action_params.len());
    for (i, params) in action_params.iter().enumerate() {
        let action = params
            .to_action()
            .map_err(|e| format!("Action {} build failed: {}", i, e))?;
        actions.push(action);
    }
    Ok(actions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::near::AccessKeyPermission;

    #[test]
    fn transfer_action_parses_yocto_amounts() {
        let params = ActionParams::Transfer {
            deposit: "1000000000000000000000000".to_string(),
        };
        match params.to_action().unwrap() {
            Action::Transfer { deposit } => {
                assert_eq!(deposit, 1_000_000_000_000_000_000_000_000)
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn transfer_rejects_invalid_amounts() {
        assert!(ActionParams::Transfer {
            deposit: "".to_string()
        }
        .validate()
        .is_err());
        assert!(ActionParams::Transfer {
            deposit: "12.5".to_string()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn add_key_parses_full_access_json() {
        let pk = format!("ed25519:{}", bs58::encode([1u8; 32]).into_string());
        let params = ActionParams::AddKey {
            public_key: pk,
            access_key: r#"{"nonce":0,"permission":"FullAccess"}"#.to_string(),
        };
        match params.to_action().unwrap() {
            Action::AddKey { access_key, .. } => {
                assert_eq!(access_key.permission, AccessKeyPermission::FullAccess)
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn add_key_parses_function_call_permission_json() {
        let pk = format!("ed25519:{}", bs58::encode([1u8; 32]).into_string());
        let access_key = r#"{
            "nonce": 0,
            "permission": {
                "FunctionCall": {
                    "allowance": "250000000000000000000000",
                    "receiverId": "contract.testnet",
                    "methodNames": ["set_greeting"]
                }
            }
        }"#;
        let params = ActionParams::AddKey {
            public_key: pk,
            access_key: access_key.to_string(),
        };
        match params.to_action().unwrap() {
            Action::AddKey { access_key, .. } => match access_key.permission {
                AccessKeyPermission::FunctionCall(fc) => {
                    assert_eq!(fc.receiver_id, "contract.testnet");
                    assert_eq!(fc.allowance, Some(250_000_000_000_000_000_000_000));
                    assert_eq!(fc.method_names, vec!["set_greeting".to_string()]);
                }
                other => panic!("unexpected permission: {:?}", other),
            },
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn function_call_requires_method_name() {
        let params = ActionParams::FunctionCall {
            method_name: "".to_string(),
            args: "{}".to_string(),
            gas: "30000000000000".to_string(),
            deposit: "0".to_string(),
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn delete_key_rejects_malformed_public_keys() {
        assert!(ActionParams::DeleteKey {
            public_key: "ed25519:short".to_string()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn build_actions_reports_failing_index() {
        let params = vec![
            ActionParams::CreateAccount,
            ActionParams::Transfer {
                deposit: "bogus".to_string(),
            },
        ];
        let err = build_actions_from_params(&params).unwrap_err();
        assert!(err.contains("Action 1"), "{}", err);
    }
}
