//! Contract bindings for the Liquidity Book pair, router and ERC20 tokens.
//!
//! Only the subset the keeper calls is declared. Router custom errors are
//! included so simulation reverts can be reported by name.

use alloy::primitives::{I256, U256};
use alloy::sol;
use alloy::sol_types::SolError;

use crate::client::{AddLiquidityParams, RemoveLiquidityParams};
use crate::error::{ChainError, ChainResult};

sol! {
    /// Standard ERC20 interface (subset used for deposits)
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
        function decimals() external view returns (uint8);
        function symbol() external view returns (string);
    }
}

sol! {
    /// Liquidity Book pair. Also the ERC1155-like LB token for its bins.
    #[sol(rpc)]
    interface ILBPair {
        function getActiveId() external view returns (uint24);
        function getBinStep() external view returns (uint16);
        function getTokenX() external view returns (address);
        function getTokenY() external view returns (address);
        function balanceOf(address account, uint256 id) external view returns (uint256);
        function isApprovedForAll(address owner, address spender) external view returns (bool);
        function setApprovalForAll(address operator, bool approved) external;
    }
}

sol! {
    /// Router `LiquidityParameters` tuple.
    #[derive(Debug)]
    struct LiquidityParameters {
        address tokenX;
        address tokenY;
        uint256 binStep;
        uint256 amountX;
        uint256 amountY;
        uint256 amountXMin;
        uint256 amountYMin;
        uint256 activeIdDesired;
        uint256 idSlippage;
        int256[] deltaIds;
        uint256[] distributionX;
        uint256[] distributionY;
        address to;
        address refundTo;
        uint256 deadline;
    }

    /// Liquidity Book router (native-wrapping entry points only)
    #[sol(rpc)]
    interface ILBRouter {
        error LBRouter__AmountSlippageCaught(uint256 amountXMin, uint256 amountX, uint256 amountYMin, uint256 amountY);
        error LBRouter__DeadlineExceeded(uint256 deadline, uint256 currentTimestamp);
        error LBRouter__IdDesiredOverflows(uint256 idDesired, uint256 idSlippage);
        error LBRouter__IdOverflows(int256 id);
        error LBRouter__IdSlippageCaught(uint256 activeIdDesired, uint256 idSlippage, uint256 activeId);
        error LBRouter__LengthsMismatch();
        error LBRouter__PairNotCreated(address tokenX, address tokenY, uint256 binStep);
        error LBRouter__WrongAmounts(uint256 amount, uint256 reserve);
        error LBRouter__WrongNativeLiquidityParameters(address tokenX, address tokenY, uint256 amountX, uint256 amountY, uint256 msgValue);
        error LBRouter__WrongTokenOrder();
        error LBRouter__FailedToSendNATIVE(address recipient, uint256 amount);
        error TokenHelper__TransferFailed();

        function addLiquidityNATIVE(LiquidityParameters calldata liquidityParameters)
            external
            payable
            returns (
                uint256 amountXAdded,
                uint256 amountYAdded,
                uint256 amountXLeft,
                uint256 amountYLeft,
                uint256[] memory depositIds,
                uint256[] memory liquidityMinted
            );

        function removeLiquidityNATIVE(
            address token,
            uint16 binStep,
            uint256 amountTokenMin,
            uint256 amountNATIVEMin,
            uint256[] memory ids,
            uint256[] memory amounts,
            address to,
            uint256 deadline
        ) external returns (uint256 amountToken, uint256 amountNATIVE);
    }
}

/// Known revert selectors and their signatures.
const KNOWN_ERRORS: &[([u8; 4], &str)] = &[
    (
        ILBRouter::LBRouter__AmountSlippageCaught::SELECTOR,
        ILBRouter::LBRouter__AmountSlippageCaught::SIGNATURE,
    ),
    (
        ILBRouter::LBRouter__DeadlineExceeded::SELECTOR,
        ILBRouter::LBRouter__DeadlineExceeded::SIGNATURE,
    ),
    (
        ILBRouter::LBRouter__IdDesiredOverflows::SELECTOR,
        ILBRouter::LBRouter__IdDesiredOverflows::SIGNATURE,
    ),
    (
        ILBRouter::LBRouter__IdOverflows::SELECTOR,
        ILBRouter::LBRouter__IdOverflows::SIGNATURE,
    ),
    (
        ILBRouter::LBRouter__IdSlippageCaught::SELECTOR,
        ILBRouter::LBRouter__IdSlippageCaught::SIGNATURE,
    ),
    (
        ILBRouter::LBRouter__LengthsMismatch::SELECTOR,
        ILBRouter::LBRouter__LengthsMismatch::SIGNATURE,
    ),
    (
        ILBRouter::LBRouter__PairNotCreated::SELECTOR,
        ILBRouter::LBRouter__PairNotCreated::SIGNATURE,
    ),
    (
        ILBRouter::LBRouter__WrongAmounts::SELECTOR,
        ILBRouter::LBRouter__WrongAmounts::SIGNATURE,
    ),
    (
        ILBRouter::LBRouter__WrongNativeLiquidityParameters::SELECTOR,
        ILBRouter::LBRouter__WrongNativeLiquidityParameters::SIGNATURE,
    ),
    (
        ILBRouter::LBRouter__WrongTokenOrder::SELECTOR,
        ILBRouter::LBRouter__WrongTokenOrder::SIGNATURE,
    ),
    (
        ILBRouter::LBRouter__FailedToSendNATIVE::SELECTOR,
        ILBRouter::LBRouter__FailedToSendNATIVE::SIGNATURE,
    ),
    (
        ILBRouter::TokenHelper__TransferFailed::SELECTOR,
        ILBRouter::TokenHelper__TransferFailed::SIGNATURE,
    ),
    // Error(string)
    ([0x08, 0xc3, 0x79, 0xa0], "Error(string)"),
];

/// Human-readable description of revert data.
///
/// Recognized router errors are reported by signature; anything else is
/// returned as hex so it can be decoded offline.
pub fn decode_revert(data: &[u8]) -> String {
    let Some(selector) = data.get(..4) else {
        return format!("0x{}", hex::encode(data));
    };

    KNOWN_ERRORS
        .iter()
        .find(|(known, _)| known.as_slice() == selector)
        .map(|(_, signature)| (*signature).to_string())
        .unwrap_or_else(|| format!("unknown(0x{})", hex::encode(selector)))
}

impl AddLiquidityParams {
    /// Convert into the router ABI tuple.
    pub fn to_abi(&self) -> ChainResult<LiquidityParameters> {
        let delta_ids = self
            .delta_ids
            .iter()
            .map(|delta| {
                I256::try_from(*delta)
                    .map_err(|e| ChainError::Config(format!("delta id {delta}: {e}")))
            })
            .collect::<ChainResult<Vec<_>>>()?;

        Ok(LiquidityParameters {
            tokenX: self.token_x,
            tokenY: self.token_y,
            binStep: U256::from(self.bin_step),
            amountX: self.amount_x,
            amountY: self.amount_y,
            amountXMin: self.amount_x_min,
            amountYMin: self.amount_y_min,
            activeIdDesired: U256::from(self.active_id_desired),
            idSlippage: U256::from(self.id_slippage),
            deltaIds: delta_ids,
            distributionX: self.distribution_x.clone(),
            distributionY: self.distribution_y.clone(),
            to: self.to,
            refundTo: self.refund_to,
            deadline: U256::from(self.deadline),
        })
    }
}

impl RemoveLiquidityParams {
    /// Convert into `removeLiquidityNATIVE` call data.
    pub fn to_call(&self) -> ILBRouter::removeLiquidityNATIVECall {
        ILBRouter::removeLiquidityNATIVECall {
            token: self.token,
            binStep: self.bin_step,
            amountTokenMin: self.amount_token_min,
            amountNATIVEMin: self.amount_native_min,
            ids: self.ids.iter().map(|id| U256::from(*id)).collect(),
            amounts: self.amounts.clone(),
            to: self.to,
            deadline: U256::from(self.deadline),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;

    #[test]
    fn test_decode_known_router_error() {
        let mut data = ILBRouter::LBRouter__IdSlippageCaught::SELECTOR.to_vec();
        data.extend_from_slice(&[0u8; 96]);
        assert_eq!(
            decode_revert(&data),
            "LBRouter__IdSlippageCaught(uint256,uint256,uint256)"
        );
    }

    #[test]
    fn test_decode_unknown_selector() {
        assert_eq!(decode_revert(&[0x99, 0x31, 0xa6, 0xae]), "unknown(0x9931a6ae)");
        assert_eq!(decode_revert(&[0x01]), "0x01");
    }

    #[test]
    fn test_add_params_to_abi() {
        let params = AddLiquidityParams {
            token_x: Address::repeat_byte(1),
            token_y: Address::repeat_byte(2),
            bin_step: 10,
            amount_x: U256::from(100u64),
            amount_y: U256::from(200u64),
            amount_x_min: U256::from(99u64),
            amount_y_min: U256::from(198u64),
            active_id_desired: 8_388_608,
            id_slippage: 10,
            delta_ids: vec![-1, 0, 1],
            distribution_x: vec![U256::ZERO, U256::from(1u64), U256::from(1u64)],
            distribution_y: vec![U256::from(1u64), U256::from(1u64), U256::ZERO],
            to: Address::repeat_byte(3),
            refund_to: Address::repeat_byte(3),
            deadline: 1_700_000_000,
        };

        let abi = params.to_abi().unwrap();
        assert_eq!(abi.binStep, U256::from(10u64));
        assert_eq!(abi.activeIdDesired, U256::from(8_388_608u64));
        assert_eq!(abi.deltaIds[0], I256::MINUS_ONE);
        assert_eq!(abi.deltaIds[1], I256::ZERO);
        assert_eq!(abi.deltaIds[2], I256::ONE);
    }

    #[test]
    fn test_remove_params_to_call() {
        let params = RemoveLiquidityParams {
            token: Address::repeat_byte(2),
            bin_step: 25,
            amount_token_min: U256::ZERO,
            amount_native_min: U256::ZERO,
            ids: vec![99, 100],
            amounts: vec![U256::from(5u64), U256::from(7u64)],
            to: Address::repeat_byte(3),
            deadline: 42,
        };

        let call = params.to_call();
        assert_eq!(call.binStep, 25);
        assert_eq!(call.ids, vec![U256::from(99u64), U256::from(100u64)]);
        assert_eq!(call.deadline, U256::from(42u64));
    }
}
